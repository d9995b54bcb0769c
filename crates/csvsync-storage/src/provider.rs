//! The storage provider contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// One entry returned by [`StorageProvider::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size_bytes: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Downloaded bytes plus where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub bytes: Vec<u8>,
    /// Stable id of the source object (Gmail message id, or the path).
    pub source_id: String,
    /// Mail subject, when the source is a message.
    pub subject: Option<String>,
}

/// Uniform contract over Local, Dropbox, Gmail and in-memory backends.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn upload(&self, data: &[u8], path: &str) -> Result<(), StorageError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, StorageError>;

    /// Download and report the source object. Providers that address files
    /// by path report the path itself.
    async fn download_with_metadata(&self, path: &str) -> Result<DownloadedFile, StorageError> {
        let bytes = self.download(path).await?;
        Ok(DownloadedFile {
            bytes,
            source_id: path.to_string(),
            subject: None,
        })
    }
}
