//! File-backed collaborators for the standalone binary.
//!
//! Imported CSVs are staged under `<data_dir>/staging`, one file per data
//! type. Dashboards are declared in `staging/dashboards.toml` and their
//! CSVs land in `staging/dashboards/<id>/`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use async_trait::async_trait;
use csvsync_core::{DataType, ImportTarget};
use csvsync_scheduler::{
    BackupExporter, DashboardInfo, DashboardIngestSummary, DashboardRetention, DatabaseDump,
    Ingestor, RecordCounts, SourceMetadata,
};
use serde::Deserialize;

/// Staged dashboard files older than this are pruned.
const DASHBOARD_RETENTION: Duration = Duration::from_secs(180 * 24 * 60 * 60);

#[derive(Debug, Default, Deserialize)]
struct DashboardsFile {
    #[serde(default, rename = "dashboard")]
    dashboards: Vec<DashboardInfo>,
}

pub struct StagingArea {
    root: PathBuf,
    history_db: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>, history_db: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            history_db: history_db.into(),
        }
    }

    fn data_file(&self, data_type: DataType) -> PathBuf {
        self.root.join(format!("{}.csv", data_type.slug()))
    }

    fn dashboard_dir(&self, id: &str) -> PathBuf {
        self.root.join("dashboards").join(sanitize(id))
    }
}

/// Split CSV text into a header and its non-empty data rows.
fn split_rows(text: &str) -> (Option<&str>, Vec<&str>) {
    let mut lines = text.lines().map(|l| l.trim_end_matches('\r')).filter(|l| !l.trim().is_empty());
    let header = lines.next();
    (header, lines.collect())
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl Ingestor for StagingArea {
    async fn ingest(
        &self,
        _targets: &[ImportTarget],
        files: HashMap<DataType, Vec<u8>>,
        replace_existing: bool,
    ) -> Result<BTreeMap<DataType, RecordCounts>> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating {}", self.root.display()))?;

        let mut out = BTreeMap::new();
        for (data_type, bytes) in files {
            let incoming = String::from_utf8_lossy(strip_bom(&bytes)).into_owned();
            let (header, rows) = split_rows(&incoming);
            let Some(header) = header else {
                anyhow::bail!("{} CSV is empty", data_type);
            };

            let path = self.data_file(data_type);
            let existing = if replace_existing {
                String::new()
            } else {
                tokio::fs::read_to_string(&path).await.unwrap_or_default()
            };
            let (_, existing_rows) = split_rows(&existing);
            let known: HashSet<&str> = existing_rows.iter().copied().collect();

            let mut merged: Vec<&str> = existing_rows.clone();
            let mut created = 0u64;
            for row in &rows {
                if !known.contains(row) {
                    merged.push(*row);
                    created += 1;
                }
            }

            let mut content = String::with_capacity(incoming.len() + existing.len());
            content.push_str(header);
            content.push('\n');
            for row in &merged {
                content.push_str(row);
                content.push('\n');
            }
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;

            let counts = RecordCounts {
                processed: rows.len() as u64,
                created,
                updated: rows.len() as u64 - created,
            };
            tracing::info!(
                "📄 Staged {}: {} processed, {} new",
                data_type,
                counts.processed,
                counts.created
            );
            out.insert(data_type, counts);
        }
        Ok(out)
    }

    async fn dashboard(&self, id: &str) -> Result<Option<DashboardInfo>> {
        let path = self.root.join("dashboards.toml");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let file: DashboardsFile =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(file.dashboards.into_iter().find(|d| d.id == id))
    }

    async fn ingest_dashboard(
        &self,
        id: &str,
        csv_text: &str,
        source: &SourceMetadata,
    ) -> Result<DashboardIngestSummary> {
        let dir = self.dashboard_dir(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let (_, rows) = split_rows(csv_text);
        let processed = rows.len() as u64;
        let path = dir.join(format!("{}.csv", sanitize(&source.source_id)));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!("📊 Dashboard '{}' already has source {}, skipping", id, source.source_id);
            return Ok(DashboardIngestSummary {
                rows_processed: processed,
                rows_added: 0,
                rows_skipped: processed,
            });
        }
        tokio::fs::write(&path, csv_text)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(DashboardIngestSummary {
            rows_processed: processed,
            rows_added: processed,
            rows_skipped: 0,
        })
    }
}

#[async_trait]
impl BackupExporter for StagingArea {
    async fn export_csv(&self, data_type: DataType) -> Result<Vec<u8>> {
        let path = self.data_file(data_type);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading staged {}", path.display()))
    }

    async fn dump_database(&self) -> Result<DatabaseDump> {
        let bytes = tokio::fs::read(&self.history_db)
            .await
            .with_context(|| format!("reading {}", self.history_db.display()))?;
        let file_name = self
            .history_db
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "history.db".into());
        Ok(DatabaseDump { file_name, bytes })
    }
}

#[async_trait]
impl DashboardRetention for StagingArea {
    async fn cleanup(&self) -> Result<u64> {
        prune_older_than(&self.root.join("dashboards"), DASHBOARD_RETENTION).await
    }
}

async fn prune_older_than(dir: &Path, max_age: Duration) -> Result<u64> {
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return Ok(0);
    };
    let mut removed = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("listing {}", current.display())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.modified().map(|m| m < cutoff).unwrap_or(false) {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
