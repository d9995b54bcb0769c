//! Scheduler error taxonomy.

use csvsync_core::CsvSyncError;
use csvsync_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Schedule not found: {0}")]
    NotFound(String),

    #[error("Schedule is disabled: {0}")]
    Disabled(String),

    #[error("Import is already running: {0}")]
    AlreadyRunning(String),

    #[error("Schedule already exists: {0}")]
    Duplicate(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("No matching Gmail messages found for {0}")]
    NoMatchingSource(String),

    #[error("Ingestion failed: {0:#}")]
    Ingestion(anyhow::Error),

    #[error("CSV import failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<ImportError>,
    },

    #[error("History store error: {0}")]
    History(String),
}

impl From<CsvSyncError> for ImportError {
    fn from(err: CsvSyncError) -> Self {
        match err {
            CsvSyncError::Validation(msg) => Self::Validation(msg),
            other => Self::Config(other.to_string()),
        }
    }
}

impl ImportError {
    /// HTTP-equivalent status for API callers.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::AlreadyRunning(_) | Self::Duplicate(_) => 409,
            Self::Disabled(_) | Self::Validation(_) | Self::Config(_) => 400,
            _ => 500,
        }
    }

    /// The error of the last attempt, looking through retry wrapping.
    pub fn root(&self) -> &ImportError {
        match self {
            Self::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// The Gmail refresh token was revoked and a human must re-authorize.
    pub fn is_reauth_required(&self) -> bool {
        matches!(self.root(), Self::Storage(StorageError::ReauthRequired(_)))
    }
}
