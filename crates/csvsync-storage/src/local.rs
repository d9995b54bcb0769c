//! Local filesystem provider rooted at a base directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::provider::{FileInfo, StorageProvider};

pub struct LocalStorageProvider {
    base_dir: PathBuf,
}

impl LocalStorageProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve `path` under the base directory, refusing `..` escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }

    fn relative_display(&self, full: &Path) -> String {
        full.strip_prefix(&self.base_dir)
            .unwrap_or(full)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, data: &[u8], path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        tracing::debug!("💾 Wrote {} bytes to {}", data.len(), full.display());
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("File already absent: {}", full.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        let root = self.resolve(path)?;
        if !tokio::fs::try_exists(&root).await? {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                } else {
                    files.push(FileInfo {
                        path: self.relative_display(&entry.path()),
                        size_bytes: Some(meta.len()),
                        modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
                    });
                }
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path());

        provider.upload(b"a,b\n1,2\n", "csv/employees.csv").await.unwrap();
        provider.upload(b"x", "/database/nested/dump.sql").await.unwrap();

        assert_eq!(
            provider.download("csv/employees.csv").await.unwrap(),
            b"a,b\n1,2\n".to_vec()
        );

        let listed = provider.list("").await.unwrap();
        let paths: Vec<_> = listed.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["csv/employees.csv", "database/nested/dump.sql"]);
        assert_eq!(listed[0].size_bytes, Some(8));

        provider.delete("csv/employees.csv").await.unwrap();
        provider.delete("csv/employees.csv").await.unwrap();
        assert!(matches!(
            provider.download("csv/employees.csv").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_parent_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path());
        assert!(matches!(
            provider.download("../secret").await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path());
        assert!(provider.list("nothing/here").await.unwrap().is_empty());
    }
}
