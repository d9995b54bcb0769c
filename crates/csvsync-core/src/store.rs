//! Config store: a single TOML document on disk.
//!
//! Reads hand out normalized snapshots. Writes go to a temp file in the same
//! directory and are renamed over the original, so readers never observe a
//! partial document. Writers take no lock: last write wins.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::CsvSyncConfig;
use crate::error::{CsvSyncError, Result};

/// Legacy keys dropped by [`ConfigStore::cleanup_legacy_keys`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyCleanupReport {
    pub removed: Vec<&'static str>,
}

/// File-backed configuration store.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$CSVSYNC_CONFIG`, else `~/.csvsync/config.toml`.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("CSVSYNC_CONFIG")
            && !path.trim().is_empty()
        {
            return PathBuf::from(shellexpand::tilde(&path).into_owned());
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".csvsync")
            .join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load with env references resolved and legacy keys folded in.
    /// The file itself is never touched.
    pub fn load(&self) -> Result<CsvSyncConfig> {
        let mut config = self.load_raw()?;
        config.normalize();
        Ok(config)
    }

    /// Load exactly what is on disk. A missing file yields defaults.
    pub fn load_raw(&self) -> Result<CsvSyncConfig> {
        if !self.path.exists() {
            tracing::warn!(
                "⚠️ Config file not found at {}, using defaults",
                self.path.display()
            );
            return Ok(CsvSyncConfig::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| CsvSyncError::Config(format!("Failed to read config: {e}")))?;
        CsvSyncConfig::from_toml(&content)
    }

    /// Validate and atomically replace the document.
    pub fn save(&self, config: &CsvSyncConfig) -> Result<()> {
        config.validate()?;
        let content = config.to_toml()?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| CsvSyncError::Io(e.error))?;

        tracing::debug!("💾 Config saved to {}", self.path.display());
        Ok(())
    }

    /// Re-read the raw document, apply `f`, then save.
    ///
    /// Working on the raw document keeps `${VAR}` references and legacy keys
    /// exactly as the operator wrote them.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut CsvSyncConfig) -> Result<T>,
    {
        let mut config = self.load_raw()?;
        let out = f(&mut config)?;
        self.save(&config)?;
        Ok(out)
    }

    /// Remove legacy credential keys for providers whose namespaced
    /// credential set is complete. Nothing is written if nothing changes.
    pub fn cleanup_legacy_keys(&self) -> Result<LegacyCleanupReport> {
        let mut config = self.load_raw()?;
        let removed = config.storage.options.cleanup_legacy_keys();
        if !removed.is_empty() {
            self.save(&config)?;
            tracing::info!("🧹 Removed legacy config keys: {}", removed.join(", "));
        }
        Ok(LegacyCleanupReport { removed })
    }
}
