//! Schedule administration: CRUD over `csv_imports` plus manual runs and
//! history queries. Every mutation re-registers triggers on a running
//! scheduler.

use std::sync::Arc;

use csvsync_core::{
    AutoBackupSettings, ConfigStore, CsvSyncError, ImportTarget, JobDefinition, RetryPolicy,
    StorageProviderKind,
};
use serde::{Deserialize, Serialize};

use crate::cron::validate_schedule;
use crate::error::ImportError;
use crate::history::{HistoryFilter, ImportHistory, ImportHistoryRecord};
use crate::ingest::ImportSummary;
use crate::scheduler::ImportScheduler;

/// Partial update for a schedule. Absent fields keep their value; the id
/// can never change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulePatch {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub provider: Option<StorageProviderKind>,
    pub enabled: Option<bool>,
    pub replace_existing: Option<bool>,
    pub employees_path: Option<String>,
    pub items_path: Option<String>,
    pub retry: Option<RetryPolicy>,
    pub auto_backup_after_import: Option<AutoBackupSettings>,
    pub targets: Option<Vec<ImportTarget>>,
}

impl SchedulePatch {
    pub fn apply(self, job: &mut JobDefinition) {
        if let Some(v) = self.name {
            job.name = v;
        }
        if let Some(v) = self.schedule {
            job.schedule = v;
        }
        if let Some(v) = self.provider {
            job.provider = Some(v);
        }
        if let Some(v) = self.enabled {
            job.enabled = v;
        }
        if let Some(v) = self.replace_existing {
            job.replace_existing = v;
        }
        if let Some(v) = self.employees_path {
            job.employees_path = Some(v);
        }
        if let Some(v) = self.items_path {
            job.items_path = Some(v);
        }
        if let Some(v) = self.retry {
            job.retry = v;
        }
        if let Some(v) = self.auto_backup_after_import {
            job.auto_backup_after_import = v;
        }
        if let Some(v) = self.targets {
            job.targets = v;
        }
    }
}

/// Upper bound on retries per scheduled run.
pub const MAX_RETRIES: u32 = 10;

/// Check a definition before it is persisted.
pub fn validate_job(job: &JobDefinition, global: StorageProviderKind) -> Result<(), ImportError> {
    if job.id.trim().is_empty() {
        return Err(ImportError::Validation("schedule id must not be empty".into()));
    }
    validate_schedule(&job.schedule).map_err(ImportError::Validation)?;

    if job.retry.max_retries > MAX_RETRIES {
        return Err(ImportError::Validation(format!(
            "max_retries must be at most {MAX_RETRIES}"
        )));
    }
    if job.retry.retry_interval_secs == 0 {
        return Err(ImportError::Validation(
            "retry_interval_secs must be at least 1".into(),
        ));
    }

    if job.provider == Some(StorageProviderKind::Local) {
        return Err(ImportError::Validation(
            "provider override must be dropbox or gmail".into(),
        ));
    }

    let targets = job.resolved_targets();
    if targets.is_empty() {
        return Err(ImportError::Validation(
            "at least one import target is required".into(),
        ));
    }
    if let Some(t) = targets.iter().find(|t| t.source.trim().is_empty()) {
        return Err(ImportError::Validation(format!(
            "target '{}' has an empty source",
            t.data_type
        )));
    }

    if job.effective_provider(global) == StorageProviderKind::Dropbox {
        for (field, path) in [("employees_path", &job.employees_path), ("items_path", &job.items_path)] {
            if let Some(path) = path.as_deref().filter(|p| !p.trim().is_empty())
                && !path.to_ascii_lowercase().ends_with(".csv")
            {
                return Err(ImportError::Validation(format!(
                    "{field} must point to a .csv file: {path}"
                )));
            }
        }
    }
    Ok(())
}

pub struct ScheduleAdmin {
    store: ConfigStore,
    scheduler: ImportScheduler,
    history: Arc<ImportHistory>,
}

impl ScheduleAdmin {
    pub fn new(scheduler: ImportScheduler) -> Self {
        Self {
            store: scheduler.config_store().clone(),
            history: scheduler.history(),
            scheduler,
        }
    }

    pub fn list_schedules(&self) -> Result<Vec<JobDefinition>, ImportError> {
        Ok(self.store.load()?.csv_imports)
    }

    pub fn add_schedule(&self, job: JobDefinition) -> Result<JobDefinition, ImportError> {
        let current = self.store.load()?;
        if current.find_job(&job.id).is_some() {
            return Err(ImportError::Duplicate(job.id));
        }
        validate_job(&job, current.storage.provider)?;

        let added = job.clone();
        self.store.update(|config| {
            if config.find_job(&job.id).is_some() {
                return Err(CsvSyncError::Validation(format!(
                    "duplicate schedule id '{}'",
                    job.id
                )));
            }
            config.csv_imports.push(job);
            Ok(())
        })?;
        tracing::info!("📅 Schedule added: '{}'", added.id);
        self.reload_if_running()?;
        Ok(added)
    }

    pub fn update_schedule(&self, id: &str, patch: SchedulePatch) -> Result<JobDefinition, ImportError> {
        let raw = self.store.load_raw()?;
        let mut merged = raw
            .find_job(id)
            .cloned()
            .ok_or_else(|| ImportError::NotFound(id.to_string()))?;
        patch.apply(&mut merged);
        merged.id = id.to_string();
        validate_job(&merged, raw.storage.provider)?;

        let updated = merged.clone();
        self.store.update(|config| {
            let slot = config
                .find_job_mut(id)
                .ok_or_else(|| CsvSyncError::Validation(format!("schedule '{id}' disappeared")))?;
            *slot = merged;
            Ok(())
        })?;
        tracing::info!("📝 Schedule updated: '{}'", id);
        self.reload_if_running()?;
        Ok(updated)
    }

    pub fn delete_schedule(&self, id: &str) -> Result<(), ImportError> {
        if self.store.load_raw()?.find_job(id).is_none() {
            return Err(ImportError::NotFound(id.to_string()));
        }
        self.store.update(|config| {
            config.csv_imports.retain(|j| j.id != id);
            Ok(())
        })?;
        tracing::info!("🗑️ Schedule removed: '{}'", id);
        self.reload_if_running()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<JobDefinition, ImportError> {
        self.update_schedule(
            id,
            SchedulePatch {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
    }

    pub async fn run_import(&self, id: &str) -> Result<ImportSummary, ImportError> {
        self.scheduler.run_import(id).await
    }

    pub fn get_history(&self, filter: &HistoryFilter) -> Result<Vec<ImportHistoryRecord>, ImportError> {
        self.history.query(filter).map_err(ImportError::History)
    }

    fn reload_if_running(&self) -> Result<(), ImportError> {
        if self.scheduler.is_running() {
            self.scheduler.reload()?;
        }
        Ok(())
    }
}
