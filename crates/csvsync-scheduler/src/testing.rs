//! Fakes shared by the scheduler and admin tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use csvsync_core::{
    ConfigStore, CsvSyncConfig, DataType, ImportTarget, JobDefinition, StorageOptions,
    StorageProviderKind,
};
use csvsync_storage::{
    MemoryTokenStore, MockStorageProvider, ProviderFactory, StorageError, StorageProvider,
    TokenStore,
};
use tokio::sync::Notify;

use crate::alerts::{ImportAlerter, MemoryAlertSink};
use crate::backup::AutoBackup;
use crate::error::ImportError;
use crate::executor::ImportRunner;
use crate::history::ImportHistory;
use crate::ingest::{BackupExporter, DatabaseDump, ImportSummary, RecordCounts};
use crate::scheduler::{ImportScheduler, SchedulerDeps};

/// Runner whose outcome the test flips at will.
#[derive(Default)]
pub struct FakeRunner {
    pub attempts: AtomicU32,
    pub fail: AtomicBool,
    pub reauth: AtomicBool,
    /// When set, each attempt waits for a notification before finishing.
    pub hold: Option<Arc<Notify>>,
}

impl FakeRunner {
    pub fn failing() -> Self {
        let runner = Self::default();
        runner.fail.store(true, Ordering::SeqCst);
        runner
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImportRunner for FakeRunner {
    async fn execute(&self, _job: &JobDefinition, _config: &CsvSyncConfig) -> Result<ImportSummary, ImportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        if self.reauth.load(Ordering::SeqCst) {
            return Err(StorageError::ReauthRequired("invalid_grant".into()).into());
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ImportError::Config("download failed".into()));
        }
        let mut summary = ImportSummary::default();
        summary.data.insert(
            DataType::Employees,
            RecordCounts {
                processed: 2,
                created: 2,
                updated: 0,
            },
        );
        Ok(summary)
    }
}

/// Hands out one shared in-memory provider.
pub struct MockFactory(pub Arc<MockStorageProvider>);

#[async_trait]
impl ProviderFactory for MockFactory {
    async fn create(
        &self,
        _kind: StorageProviderKind,
        _options: &StorageOptions,
        _tokens: Arc<dyn TokenStore>,
    ) -> Result<Arc<dyn StorageProvider>, StorageError> {
        Ok(self.0.clone())
    }
}

/// Exporter where every export fails.
pub struct BrokenExporter;

#[async_trait]
impl BackupExporter for BrokenExporter {
    async fn export_csv(&self, _data_type: DataType) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("export failed")
    }

    async fn dump_database(&self) -> anyhow::Result<DatabaseDump> {
        anyhow::bail!("dump failed")
    }
}

pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub store: ConfigStore,
    pub runner: Arc<FakeRunner>,
    pub alerts: Arc<MemoryAlertSink>,
    pub history: Arc<ImportHistory>,
    pub storage: Arc<MockStorageProvider>,
    pub scheduler: ImportScheduler,
}

pub fn job(id: &str, schedule: &str) -> JobDefinition {
    JobDefinition::new(id, id, schedule, vec![ImportTarget::new(DataType::Employees, "/csv/employees.csv")])
}

pub fn harness(jobs: Vec<JobDefinition>, runner: FakeRunner) -> Harness {
    harness_with_backup(jobs, runner, None)
}

pub fn harness_with_backup(
    jobs: Vec<JobDefinition>,
    runner: FakeRunner,
    exporter: Option<Arc<dyn BackupExporter>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("config.toml"));
    let mut config = CsvSyncConfig::default();
    config.storage.provider = StorageProviderKind::Dropbox;
    config.scheduler.timezone = "UTC".into();
    config.csv_imports = jobs;
    store.save(&config).unwrap();

    let runner = Arc::new(runner);
    let alerts = Arc::new(MemoryAlertSink::new());
    let history = Arc::new(ImportHistory::open_in_memory().unwrap());
    let storage = Arc::new(MockStorageProvider::new());
    let backup = exporter.map(|e| Arc::new(AutoBackup::new(e, history.clone())));

    let scheduler = ImportScheduler::new(SchedulerDeps {
        config_store: store.clone(),
        runner: runner.clone(),
        history: history.clone(),
        alerter: Arc::new(ImportAlerter::new(vec![alerts.clone()])),
        backup,
        retention: None,
        providers: Arc::new(MockFactory(storage.clone())),
        tokens: Arc::new(MemoryTokenStore::new()),
    });

    Harness {
        _dir: dir,
        store,
        runner,
        alerts,
        history,
        storage,
        scheduler,
    }
}
