//! Backups chained onto a successful import.
//!
//! Each target (one per imported data type, plus the database dump) gets its
//! own history record and succeeds or fails on its own.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use csvsync_core::JobDefinition;
use csvsync_storage::StorageProvider;
use sha2::{Digest, Sha256};

use crate::history::{ImportHistory, NewBackup};
use crate::ingest::{BackupExporter, ImportSummary};

/// Per-target outcome of one auto-backup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupReport {
    /// Paths written.
    pub succeeded: Vec<String>,
    /// `(label, error)` for each target that failed.
    pub failed: Vec<(String, String)>,
}

impl BackupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct AutoBackup {
    exporter: Arc<dyn BackupExporter>,
    history: Arc<ImportHistory>,
}

impl AutoBackup {
    pub fn new(exporter: Arc<dyn BackupExporter>, history: Arc<ImportHistory>) -> Self {
        Self { exporter, history }
    }

    /// Back up whatever `job.auto_backup_after_import` asks for.
    pub async fn run(
        &self,
        job: &JobDefinition,
        summary: &ImportSummary,
        provider: &dyn StorageProvider,
    ) -> BackupReport {
        let settings = &job.auto_backup_after_import;
        let stamp = backup_timestamp();
        let mut report = BackupReport::default();

        if settings.wants_csv() {
            for data_type in summary.data_types() {
                let label = format!("auto-after-import-{}-{}", job.id, data_type.slug());
                let path = format!("csv/{stamp}-{label}/{}.csv", data_type.slug());
                let result = self
                    .backup_one(job, "csv", data_type.as_str(), &label, &path, provider, || {
                        self.exporter.export_csv(data_type)
                    })
                    .await;
                record(&mut report, label, path, result);
            }
        }

        if settings.wants_database() {
            let label = format!("auto-after-import-{}", job.id);
            match self.exporter.dump_database().await {
                Ok(dump) => {
                    let path = format!("database/{stamp}-{label}/{}", dump.file_name);
                    let bytes = dump.bytes;
                    let result = self
                        .backup_one(job, "database", "database", &label, &path, provider, || async {
                            Ok(bytes)
                        })
                        .await;
                    record(&mut report, label, path, result);
                }
                Err(e) => {
                    tracing::error!("❌ Database dump for '{}' failed: {:#}", job.id, e);
                    report.failed.push((label, format!("{e:#}")));
                }
            }
        }

        if !report.succeeded.is_empty() {
            tracing::info!(
                "💾 Auto-backup for '{}': {} target(s) written",
                job.id,
                report.succeeded.len()
            );
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn backup_one<F, Fut>(
        &self,
        job: &JobDefinition,
        target: &str,
        source: &str,
        label: &str,
        path: &str,
        provider: &dyn StorageProvider,
        produce: F,
    ) -> Result<(), String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Vec<u8>>>,
    {
        let record_id = self.history.create_backup(&NewBackup {
            schedule_id: Some(&job.id),
            target,
            source,
            label,
            path,
        })?;

        let outcome = async {
            let bytes = produce().await.map_err(|e| format!("{e:#}"))?;
            let hash = hex_sha256(&bytes);
            provider
                .upload(&bytes, path)
                .await
                .map_err(|e| e.to_string())?;
            Ok::<_, String>((hash, bytes.len() as u64))
        }
        .await;

        match outcome {
            Ok((hash, size)) => self.history.complete_backup(&record_id, &hash, size),
            Err(e) => {
                if let Err(db) = self.history.fail_backup(&record_id, &e) {
                    tracing::warn!("⚠️ Could not mark backup {} failed: {}", record_id, db);
                }
                Err(e)
            }
        }
    }
}

fn record(report: &mut BackupReport, label: String, path: String, result: Result<(), String>) {
    match result {
        Ok(()) => report.succeeded.push(path),
        Err(e) => {
            tracing::error!("❌ Backup {} failed: {}", label, e);
            report.failed.push((label, e));
        }
    }
}

/// RFC 3339 now, safe for use in a path segment.
fn backup_timestamp() -> String {
    Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

fn hex_sha256(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
