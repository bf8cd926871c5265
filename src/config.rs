use crate::core::{HistoryError, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default directory of the history store
pub const DEFAULT_HISTORY_ROOT: &str = "config-history";

/// Default base URL used for diff links
pub const DEFAULT_ROOT_URL: &str = "http://localhost:8080/";

/// Configuration history settings
///
/// Can be built in code or loaded from a JSON file; missing fields take
/// their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Root directory of the history store
    pub history_root: PathBuf,

    /// Revisions kept per entity (zero or negative keeps everything)
    pub max_entries: i64,

    /// Revisions older than this many days are pruned
    pub max_age_days: Option<u32>,

    /// Base URL of the host, used to build diff links
    pub root_url: String,

    /// Entities whose name matches this regex are not tracked
    pub exclude_pattern: Option<String>,

    /// Run retention after every recorded change
    pub prune_on_write: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            history_root: PathBuf::from(DEFAULT_HISTORY_ROOT),
            max_entries: 0,
            max_age_days: None,
            root_url: DEFAULT_ROOT_URL.to_string(),
            exclude_pattern: None,
            prune_on_write: true,
        }
    }
}

impl HistoryConfig {
    /// Create a configuration for the given history directory
    pub fn new<P: AsRef<Path>>(history_root: P) -> Self {
        Self {
            history_root: history_root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // { "history_root": "/var/lib/jobs/config-history", "max_entries": 50 }
    /// let config = HistoryConfig::from_json_file("history.json")?;
    /// ```
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            HistoryError::ConfigError(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            HistoryError::ConfigError(format!("Failed to parse '{}': {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set maximum revisions per entity
    pub fn max_entries(mut self, max: i64) -> Self {
        self.max_entries = max;
        self
    }

    /// Set maximum revision age in days
    pub fn max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = Some(days);
        self
    }

    /// Set the host base URL
    pub fn root_url(mut self, url: &str) -> Self {
        self.root_url = url.to_string();
        self
    }

    /// Set the exclude pattern
    pub fn exclude_pattern(mut self, pattern: &str) -> Self {
        self.exclude_pattern = Some(pattern.to_string());
        self
    }

    /// Enable or disable retention after each write
    pub fn prune_on_write(mut self, enabled: bool) -> Self {
        self.prune_on_write = enabled;
        self
    }

    /// Checks the settings that can be wrong
    pub fn validate(&self) -> Result<()> {
        if self.history_root.as_os_str().is_empty() {
            return Err(HistoryError::ConfigError(
                "history_root must not be empty".to_string(),
            ));
        }
        self.compiled_exclude_pattern()?;
        Ok(())
    }

    /// Base URL with exactly one trailing slash
    pub fn normalized_root_url(&self) -> String {
        format!("{}/", self.root_url.trim_end_matches('/'))
    }

    pub(crate) fn compiled_exclude_pattern(&self) -> Result<Option<Regex>> {
        self.exclude_pattern
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    HistoryError::ConfigError(format!("Invalid exclude pattern '{}': {}", pattern, e))
                })
            })
            .transpose()
    }
}
