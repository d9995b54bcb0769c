//! Import executor: one job definition in, one [`ImportSummary`] out.
//!
//! Downloads every target through the job's effective provider and hands the
//! bytes to the [`Ingestor`]. Errors propagate untouched; deciding whether to
//! try again belongs to the retry layer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use csvsync_core::{CsvSyncConfig, DataType, ImportTarget, JobDefinition, StorageProviderKind};
use csvsync_storage::{ProviderFactory, StorageError, StorageProvider, TokenStore};

use crate::error::ImportError;
use crate::ingest::{ImportSummary, Ingestor, SourceMetadata};

/// One import attempt. The scheduler depends on this seam only.
#[async_trait]
pub trait ImportRunner: Send + Sync {
    async fn execute(&self, job: &JobDefinition, config: &CsvSyncConfig) -> Result<ImportSummary, ImportError>;
}

pub struct ImportExecutor {
    providers: Arc<dyn ProviderFactory>,
    ingestor: Arc<dyn Ingestor>,
    tokens: Arc<dyn TokenStore>,
}

impl ImportExecutor {
    pub fn new(providers: Arc<dyn ProviderFactory>, ingestor: Arc<dyn Ingestor>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            providers,
            ingestor,
            tokens,
        }
    }

    async fn import_dashboards(
        &self,
        provider: &dyn StorageProvider,
        kind: StorageProviderKind,
        targets: &[ImportTarget],
        summary: &mut ImportSummary,
    ) -> Result<(), ImportError> {
        for target in targets {
            let id = target.source.trim();
            let dashboard = match self.ingestor.dashboard(id).await.map_err(ImportError::Ingestion)? {
                Some(d) => d,
                None => {
                    tracing::warn!("⚠️ Dashboard '{}' not found, skipping", id);
                    continue;
                }
            };
            if !dashboard.enabled {
                tracing::warn!("⚠️ Dashboard '{}' is disabled, skipping", id);
                continue;
            }
            let key = match kind {
                StorageProviderKind::Gmail => dashboard.gmail_subject_pattern.as_deref(),
                _ => dashboard.dropbox_path.as_deref(),
            };
            let Some(locator) = key.map(str::trim).filter(|k| !k.is_empty()) else {
                tracing::warn!("⚠️ Dashboard '{}' has no {} lookup key, skipping", id, kind);
                continue;
            };

            let file = provider.download_with_metadata(locator).await?;
            let text = decode_csv(&file.bytes);
            let source = SourceMetadata {
                source_id: file.source_id,
                subject: file.subject,
                locator: locator.to_string(),
            };
            let result = self
                .ingestor
                .ingest_dashboard(id, &text, &source)
                .await
                .map_err(ImportError::Ingestion)?;
            tracing::info!(
                "📊 Dashboard '{}': {} rows processed, {} added, {} skipped",
                id,
                result.rows_processed,
                result.rows_added,
                result.rows_skipped
            );
            summary.dashboards.insert(id.to_string(), result);
        }
        Ok(())
    }

    async fn download_direct(
        &self,
        provider: &dyn StorageProvider,
        kind: StorageProviderKind,
        config: &CsvSyncConfig,
        target: &ImportTarget,
    ) -> Result<Vec<u8>, ImportError> {
        if kind != StorageProviderKind::Gmail {
            return Ok(provider.download(target.source.trim()).await?);
        }

        for candidate in gmail_candidates(config, target) {
            match provider.download(&candidate).await {
                Ok(bytes) => {
                    tracing::debug!("📧 {} matched subject '{}'", target.data_type, candidate);
                    return Ok(bytes);
                }
                Err(StorageError::NoMatchingMessage(query)) => {
                    tracing::debug!("No Gmail message for {}: {}", target.data_type, query);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ImportError::NoMatchingSource(target.data_type.to_string()))
    }
}

#[async_trait]
impl ImportRunner for ImportExecutor {
    async fn execute(&self, job: &JobDefinition, config: &CsvSyncConfig) -> Result<ImportSummary, ImportError> {
        let kind = job.effective_provider(config.storage.provider);
        if !kind.is_remote() {
            return Err(ImportError::Config(format!(
                "CSV import requires a dropbox or gmail provider, got '{kind}'"
            )));
        }

        let targets = job.resolved_targets();
        if targets.is_empty() {
            return Err(ImportError::Config("no import targets configured".into()));
        }

        let provider = self
            .providers
            .create(kind, &config.storage.options, self.tokens.clone())
            .await?;
        tracing::info!(
            "📥 Import '{}' via {}: {} target(s)",
            job.display_name(),
            provider.name(),
            targets.len()
        );

        let (dashboards, direct): (Vec<_>, Vec<_>) =
            targets.into_iter().partition(|t| t.data_type.is_dashboard());

        let mut summary = ImportSummary::default();
        self.import_dashboards(provider.as_ref(), kind, &dashboards, &mut summary)
            .await?;

        if !direct.is_empty() {
            let mut files: HashMap<DataType, Vec<u8>> = HashMap::new();
            for target in &direct {
                let bytes = self
                    .download_direct(provider.as_ref(), kind, config, target)
                    .await?;
                tracing::debug!("⬇️ {}: {} bytes", target.data_type, bytes.len());
                files.insert(target.data_type, bytes);
            }
            summary.data = self
                .ingestor
                .ingest(&direct, files, job.replace_existing)
                .await
                .map_err(ImportError::Ingestion)?;
        }

        Ok(summary)
    }
}

/// Subject patterns to try for a Gmail target, in order.
fn gmail_candidates(config: &CsvSyncConfig, target: &ImportTarget) -> Vec<String> {
    let mut candidates = config.subject_patterns_for(target.data_type);
    let source = target.source.trim();
    if !source.is_empty() && !candidates.iter().any(|c| c == source) {
        candidates.push(source.to_string());
    }
    candidates
}

fn decode_csv(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
