use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Write error: {0}")]
    WriteError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt history entry: {0}")]
    Corruption(String),

    #[error("Retention error: {0}")]
    RetentionError(String),

    #[error("Could not allocate a revision identifier: {0}")]
    IdentifierExhausted(String),

    #[error("Entity '{0}' is deleted; only a create may follow")]
    EntityDeleted(String),

    #[error("Invalid entity name: {0}")]
    InvalidEntityName(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

impl<T> From<std::sync::PoisonError<T>> for HistoryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
