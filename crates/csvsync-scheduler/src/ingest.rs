//! Seams to the collaborators that own the data: ingestion, backup export
//! and dashboard retention. The scheduler only moves bytes between storage
//! and these traits.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use csvsync_core::{DataType, ImportTarget};
use serde::{Deserialize, Serialize};

/// Per-data-type record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
}

/// Outcome of ingesting one dashboard CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardIngestSummary {
    pub rows_processed: u64,
    pub rows_added: u64,
    pub rows_skipped: u64,
}

/// Everything one import execution produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    #[serde(default)]
    pub data: BTreeMap<DataType, RecordCounts>,
    #[serde(default)]
    pub dashboards: BTreeMap<String, DashboardIngestSummary>,
}

impl ImportSummary {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.dashboards.is_empty()
    }

    /// Data types that were actually imported.
    pub fn data_types(&self) -> Vec<DataType> {
        self.data.keys().copied().collect()
    }
}

/// Where a dashboard CSV came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_id: String,
    pub subject: Option<String>,
    /// The lookup key used to find it (subject pattern or path).
    pub locator: String,
}

/// Stored dashboard settings relevant to fetching its CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardInfo {
    pub id: String,
    pub enabled: bool,
    pub gmail_subject_pattern: Option<String>,
    pub dropbox_path: Option<String>,
}

#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Ingest downloaded CSV buffers, keyed by data type.
    async fn ingest(
        &self,
        targets: &[ImportTarget],
        files: HashMap<DataType, Vec<u8>>,
        replace_existing: bool,
    ) -> anyhow::Result<BTreeMap<DataType, RecordCounts>>;

    async fn dashboard(&self, id: &str) -> anyhow::Result<Option<DashboardInfo>>;

    async fn ingest_dashboard(
        &self,
        id: &str,
        csv_text: &str,
        source: &SourceMetadata,
    ) -> anyhow::Result<DashboardIngestSummary>;
}

/// A full database dump ready for upload.
#[derive(Debug, Clone)]
pub struct DatabaseDump {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait BackupExporter: Send + Sync {
    async fn export_csv(&self, data_type: DataType) -> anyhow::Result<Vec<u8>>;

    async fn dump_database(&self) -> anyhow::Result<DatabaseDump>;
}

#[async_trait]
pub trait DashboardRetention: Send + Sync {
    /// Drop expired dashboard rows; returns how many were removed.
    async fn cleanup(&self) -> anyhow::Result<u64>;
}
