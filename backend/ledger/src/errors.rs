//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Blob storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Protocol(#[from] earmark_protocol::Error),
}

impl LedgerError {
    /// Persistence failed; the operation did not happen and may be retried.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Migrate(_) | Self::Io(_) | Self::Corrupt(_)
        )
    }

    pub fn protocol(&self) -> Option<&earmark_protocol::Error> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
