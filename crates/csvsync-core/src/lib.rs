//! # CSVSync Core
//!
//! Shared configuration model and the config store that every other crate
//! reads from. The config document is the only shared mutable resource in
//! the system: readers get a normalized snapshot, writers go through an
//! atomic write-then-rename.

pub mod config;
pub mod error;
pub mod store;

pub use config::{
    AlertTarget, AlertsConfig, AutoBackupSettings, BackupTargetKind, CsvSyncConfig, DataType,
    DropboxOptions, GmailOptions, HistoryRetentionPolicy, ImportTarget, JobDefinition,
    RetryPolicy, SchedulerSettings, StorageConfig, StorageOptions, StorageProviderKind,
};
pub use error::{CsvSyncError, Result};
pub use store::{ConfigStore, LegacyCleanupReport};
