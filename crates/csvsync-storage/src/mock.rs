//! In-memory provider for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::provider::{FileInfo, StorageProvider};

#[derive(Default)]
pub struct MockStorageProvider {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MockStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.to_string(), data.to_vec());
        }
        self
    }

    /// Snapshot of stored paths.
    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StorageError> {
        self.files
            .lock()
            .map_err(|_| StorageError::Configuration("mock storage poisoned".into()))
    }
}

#[async_trait]
impl StorageProvider for MockStorageProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upload(&self, data: &[u8], path: &str) -> Result<(), StorageError> {
        self.lock()?.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.lock()?
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.lock()?.remove(path);
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        let now = Utc::now();
        Ok(self
            .lock()?
            .iter()
            .filter(|(p, _)| p.starts_with(path))
            .map(|(p, data)| FileInfo {
                path: p.clone(),
                size_bytes: Some(data.len() as u64),
                modified_at: Some(now),
            })
            .collect())
    }
}
