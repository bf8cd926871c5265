use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use config_history::{
    ChangeSinceBuildQuery, DiffAddress, DiffLink, HistoryConfig, RetentionPolicy, RevisionId,
    RevisionStore,
};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "config-history")]
#[command(about = "Inspect and maintain a job configuration history store")]
struct Cli {
    /// JSON configuration file; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root directory of the history store
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List entities that have history
    Entities,
    /// List the revisions of an entity, oldest first
    List { entity: String },
    /// Print the configuration snapshot of one revision
    Show {
        entity: String,
        revision: String,
        /// Print the metadata instead of the snapshot
        #[arg(long)]
        meta: bool,
    },
    /// Print the diff address and revision directories of two revisions
    DiffAddress {
        entity: String,
        first: String,
        second: String,
    },
    /// Check whether an entity changed after a moment (RFC 3339)
    ChangedSince { entity: String, since: String },
    /// Prune one entity, or every entity when none is given
    Prune {
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        max_entries: Option<i64>,
        #[arg(long)]
        max_age_days: Option<u32>,
    },
    /// Move the history of a renamed entity
    Relocate { from: String, to: String },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref(), cli.root)?;
    let store = RevisionStore::new(&config.history_root);

    match cli.command {
        Command::Entities => {
            for entity in store.entities()? {
                println!("{}", entity);
            }
            Ok(())
        }
        Command::List { entity } => list(&store, &entity),
        Command::Show {
            entity,
            revision,
            meta,
        } => show(&store, &entity, &revision, meta),
        Command::DiffAddress {
            entity,
            first,
            second,
        } => diff_address(&store, &config, &entity, &first, &second),
        Command::ChangedSince { entity, since } => changed_since(&store, &config, &entity, &since),
        Command::Prune {
            entity,
            max_entries,
            max_age_days,
        } => prune(&store, &config, entity.as_deref(), max_entries, max_age_days),
        Command::Relocate { from, to } => {
            store
                .relocate(&from, &to)
                .with_context(|| format!("Failed to move history of '{}' to '{}'", from, to))?;
            println!("Moved history of '{}' to '{}'", from, to);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>, root: Option<PathBuf>) -> Result<HistoryConfig> {
    let mut config = match path {
        Some(path) => HistoryConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration '{}'", path.display()))?,
        None => HistoryConfig::default(),
    };
    if let Some(root) = root {
        config.history_root = root;
    }
    config.validate()?;
    Ok(config)
}

fn parse_revision(text: &str) -> Result<RevisionId> {
    RevisionId::parse(text).map_err(|_| {
        anyhow!(
            "Invalid revision '{}'. Expected format: YYYY-MM-DD_HH-mm-ss",
            text
        )
    })
}

fn list(store: &RevisionStore, entity: &str) -> Result<()> {
    let revisions = store
        .list(entity)
        .with_context(|| format!("Failed to list history of '{}'", entity))?;
    if revisions.is_empty() {
        println!("No history for '{}'", entity);
        return Ok(());
    }

    for info in revisions {
        let renamed = info
            .old_name
            .as_deref()
            .map(|old| format!(" (from '{}')", old))
            .unwrap_or_default();
        println!(
            "{}  {:<8} {} <{}>{}",
            info.identifier,
            info.operation,
            info.actor.display_name(),
            info.actor.id(),
            renamed
        );
    }
    Ok(())
}

fn show(store: &RevisionStore, entity: &str, revision: &str, meta: bool) -> Result<()> {
    let identifier = parse_revision(revision)?;
    if meta {
        let info = store.read_info(entity, &identifier)?;
        println!("entity:    {}", info.entity);
        println!("revision:  {}", info.identifier);
        println!("operation: {}", info.operation);
        println!("user:      {} <{}>", info.actor.display_name(), info.actor.id());
        println!("timestamp: {}", info.timestamp.to_rfc3339());
        if let Some(old_name) = info.old_name {
            println!("old name:  {}", old_name);
        }
        return Ok(());
    }

    let revision = store.read(entity, &identifier)?;
    std::io::stdout()
        .write_all(&revision.snapshot)
        .context("Failed to write snapshot to stdout")?;
    Ok(())
}

fn diff_address(
    store: &RevisionStore,
    config: &HistoryConfig,
    entity: &str,
    first: &str,
    second: &str,
) -> Result<()> {
    let first = store.read_info(entity, &parse_revision(first)?)?;
    let second = store.read_info(entity, &parse_revision(second)?)?;
    let address = DiffAddress::for_revisions(&first, &second);
    let (older_dir, newer_dir) = address.locations(store, entity)?;

    println!("address: {}", address);
    println!("older:   {}", older_dir.display());
    println!("newer:   {}", newer_dir.display());
    println!(
        "link:    {}",
        DiffLink::build(&config.normalized_root_url(), store, entity, &address)?
    );
    Ok(())
}

fn changed_since(store: &RevisionStore, config: &HistoryConfig, entity: &str, since: &str) -> Result<()> {
    let reference: DateTime<Utc> = DateTime::parse_from_rfc3339(since)
        .with_context(|| format!("Invalid moment '{}'. Expected RFC 3339", since))?
        .with_timezone(&Utc);

    match ChangeSinceBuildQuery::has_changed_since(store, entity, reference)? {
        Some(change) => {
            let address = change.diff_address();
            println!(
                "changed: {} ({} by {})",
                change.latest.identifier,
                change.latest.operation,
                change.latest.actor.display_name()
            );
            println!("previous: {}", change.previous.identifier);
            println!(
                "link: {}",
                DiffLink::build(&config.normalized_root_url(), store, entity, &address)?
            );
        }
        None => println!("No configuration change since {}", reference.to_rfc3339()),
    }
    Ok(())
}

fn prune(
    store: &RevisionStore,
    config: &HistoryConfig,
    entity: Option<&str>,
    max_entries: Option<i64>,
    max_age_days: Option<u32>,
) -> Result<()> {
    let mut policy = RetentionPolicy::new(max_entries.unwrap_or(config.max_entries));
    if let Some(days) = max_age_days.or(config.max_age_days) {
        policy = policy.max_age_days(days);
    }

    let report = match entity {
        Some(entity) => policy.apply(store, entity),
        None => policy.apply_all(store),
    };

    for removed in &report.removed {
        println!("removed {} {}", removed.entity, removed.identifier);
    }
    for failure in &report.failures {
        eprintln!(
            "failed  {} {}: {}",
            failure.entity,
            failure
                .identifier
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
            failure.error
        );
    }
    println!(
        "Pruned {} of {} revisions ({} failures)",
        report.removed_count(),
        report.examined,
        report.failures.len()
    );
    if report.leftovers_removed > 0 {
        println!("Cleared {} leftovers of interrupted writes", report.leftovers_removed);
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(anyhow!("{} revisions could not be pruned", report.failures.len()))
    }
}
