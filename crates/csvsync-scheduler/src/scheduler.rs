//! The import scheduler: one cron trigger per enabled schedule, plus the
//! history and dashboard retention triggers.
//!
//! Scheduled fires that find their schedule already executing are dropped,
//! not queued. Manual runs share the same guard and execution sequence but
//! make a single attempt.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use csvsync_core::{ConfigStore, CsvSyncConfig, JobDefinition};
use csvsync_storage::{ProviderFactory, TokenStore};

use crate::alerts::ImportAlerter;
use crate::backup::AutoBackup;
use crate::cron::{CronSchedule, parse_timezone};
use crate::error::ImportError;
use crate::executor::ImportRunner;
use crate::history::ImportHistory;
use crate::ingest::{DashboardRetention, ImportSummary};
use crate::retry::retry;
use crate::tasks::CronTask;

/// Dashboard rows are pruned at 02:00 on the first of every month.
pub const DASHBOARD_RETENTION_SCHEDULE: &str = "0 2 1 * *";

/// Consecutive failures that trigger the escalation alert.
pub const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;

// ─── Execution guard ──────────────────────────────────────────────────────

/// Schedule ids with an execution in flight.
///
/// Each acquisition gets its own token, so an entry released after a
/// `clear()` cannot remove a newer acquisition of the same id.
#[derive(Default)]
pub struct ExecutionGuard {
    entries: Mutex<HashMap<String, u64>>,
    next_token: AtomicU64,
}

impl ExecutionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The map stays consistent even if a holder panicked, so poisoning is ignored.
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check-and-set in one step. `None` if `id` is already held.
    pub fn try_acquire(self: &Arc<Self>, id: &str) -> Option<GuardEntry> {
        let mut entries = self.entries();
        if entries.contains_key(id) {
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        entries.insert(id.to_string(), token);
        Some(GuardEntry {
            guard: Arc::downgrade(self),
            id: id.to_string(),
            token,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    fn release(&self, id: &str, token: u64) {
        let mut entries = self.entries();
        if entries.get(id) == Some(&token) {
            entries.remove(id);
        }
    }
}

/// Held for the duration of one execution; releases on drop.
pub struct GuardEntry {
    guard: Weak<ExecutionGuard>,
    id: String,
    token: u64,
}

impl GuardEntry {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for GuardEntry {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.upgrade() {
            guard.release(&self.id, self.token);
        }
    }
}

// ─── Scheduler ────────────────────────────────────────────────────────────

/// Collaborators the scheduler drives.
pub struct SchedulerDeps {
    pub config_store: ConfigStore,
    pub runner: Arc<dyn ImportRunner>,
    pub history: Arc<ImportHistory>,
    pub alerter: Arc<ImportAlerter>,
    /// Auto-backup is skipped entirely when absent.
    pub backup: Option<Arc<AutoBackup>>,
    pub retention: Option<Arc<dyn DashboardRetention>>,
    /// Builds the backup destination provider.
    pub providers: Arc<dyn ProviderFactory>,
    pub tokens: Arc<dyn TokenStore>,
}

#[derive(Default)]
struct Registrations {
    running: bool,
    jobs: BTreeMap<String, CronTask>,
    maintenance: Vec<CronTask>,
}

struct Inner {
    deps: SchedulerDeps,
    registrations: Mutex<Registrations>,
    guard: Arc<ExecutionGuard>,
    failures: Mutex<HashMap<String, u32>>,
}

/// Cheap to clone; all clones drive the same registrations.
#[derive(Clone)]
pub struct ImportScheduler {
    inner: Arc<Inner>,
}

impl ImportScheduler {
    pub fn new(deps: SchedulerDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                registrations: Mutex::new(Registrations::default()),
                guard: Arc::new(ExecutionGuard::new()),
                failures: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn registrations(&self) -> Result<std::sync::MutexGuard<'_, Registrations>, ImportError> {
        self.inner
            .registrations
            .lock()
            .map_err(|e| ImportError::Config(format!("scheduler state poisoned: {e}")))
    }

    /// Register triggers for every enabled schedule. Needs a tokio runtime.
    pub fn start(&self) -> Result<(), ImportError> {
        let mut regs = self.registrations()?;
        if regs.running {
            tracing::info!("⏰ Import scheduler already running");
            return Ok(());
        }

        let config = self.inner.deps.config_store.load()?;
        let tz = parse_timezone(&config.scheduler.timezone);
        self.inner.deps.alerter.reconfigure(&config.alerts);

        for job in config.csv_imports.iter().filter(|j| j.enabled) {
            let schedule = match CronSchedule::parse(&job.schedule, tz) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping schedule '{}': {}", job.id, e);
                    continue;
                }
            };
            let task = CronTask::spawn(&job.id, schedule, self.fire_callback(job.id.clone()));
            tracing::info!("📅 Scheduled '{}' ({}) [{}]", job.display_name(), job.id, job.schedule);
            regs.jobs.insert(job.id.clone(), task);
        }

        let retention = &config.csv_import_history;
        match CronSchedule::parse(&retention.cleanup_schedule, tz) {
            Ok(schedule) => {
                let history = self.inner.deps.history.clone();
                let days = retention.retention_days;
                regs.maintenance.push(CronTask::spawn(
                    "history-cleanup",
                    schedule,
                    Arc::new(move || {
                        let history = history.clone();
                        tokio::spawn(async move {
                            match history.cleanup_older_than(days) {
                                Ok(n) => tracing::info!("🧹 Removed {} import history record(s) older than {} days", n, days),
                                Err(e) => tracing::error!("❌ History cleanup failed: {}", e),
                            }
                        });
                    }),
                ));
            }
            Err(e) => tracing::warn!("⚠️ History cleanup not scheduled: {}", e),
        }

        if let Some(cleanup) = self.inner.deps.retention.clone() {
            match CronSchedule::parse(DASHBOARD_RETENTION_SCHEDULE, tz) {
                Ok(schedule) => regs.maintenance.push(CronTask::spawn(
                    "dashboard-retention",
                    schedule,
                    Arc::new(move || {
                        let cleanup = cleanup.clone();
                        tokio::spawn(async move {
                            match cleanup.cleanup().await {
                                Ok(n) => tracing::info!("🧹 Dashboard retention removed {} row(s)", n),
                                Err(e) => tracing::error!("❌ Dashboard retention failed: {:#}", e),
                            }
                        });
                    }),
                )),
                Err(e) => tracing::warn!("⚠️ Dashboard retention not scheduled: {}", e),
            }
        }

        regs.running = true;
        tracing::info!(
            "⏰ Import scheduler started: {} schedule(s), {} maintenance trigger(s)",
            regs.jobs.len(),
            regs.maintenance.len()
        );
        Ok(())
    }

    /// Cancel every trigger and forget in-flight guard entries. In-flight
    /// executions keep running to completion.
    pub fn stop(&self) {
        if self.unregister() {
            tracing::info!("⏹️ Import scheduler stopped");
        }
        self.inner.guard.clear();
    }

    /// Re-read configuration and re-register everything.
    ///
    /// Guard entries survive, so an execution still in flight keeps
    /// excluding fires of the re-registered trigger.
    pub fn reload(&self) -> Result<(), ImportError> {
        self.unregister();
        self.start()
    }

    /// Cancel every trigger. Returns whether the scheduler was running.
    fn unregister(&self) -> bool {
        let Ok(mut regs) = self.inner.registrations.lock() else {
            return false;
        };
        for (_, task) in std::mem::take(&mut regs.jobs) {
            task.stop();
        }
        for task in std::mem::take(&mut regs.maintenance) {
            task.stop();
        }
        std::mem::replace(&mut regs.running, false)
    }

    /// Run a schedule now, once, without retries.
    pub async fn run_import(&self, id: &str) -> Result<ImportSummary, ImportError> {
        let config = self.inner.deps.config_store.load()?;
        let job = config
            .find_job(id)
            .cloned()
            .ok_or_else(|| ImportError::NotFound(id.to_string()))?;
        if !job.enabled {
            return Err(ImportError::Disabled(id.to_string()));
        }
        let _entry = self
            .inner
            .guard
            .try_acquire(id)
            .ok_or_else(|| ImportError::AlreadyRunning(id.to_string()))?;

        tracing::info!("▶️ Manual import '{}'", job.display_name());
        self.execute_sequence(&job, &config, true).await
    }

    fn fire_callback(&self, id: String) -> Arc<dyn Fn() + Send + Sync> {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Some(entry) = inner.guard.try_acquire(&id) else {
                tracing::warn!("⏭️ Import '{}' still running, skipping this fire", id);
                return;
            };
            let scheduler = ImportScheduler { inner };
            tokio::spawn(async move {
                scheduler.run_scheduled(entry).await;
            });
        })
    }

    async fn run_scheduled(&self, entry: GuardEntry) {
        let id = entry.id().to_string();
        let config = match self.inner.deps.config_store.load() {
            Ok(c) => c,
            Err(e) => {
                let err = ImportError::from(e);
                tracing::error!("❌ Scheduled import '{}' could not load config: {}", id, err);
                self.record_unloadable(&id, &err).await;
                return;
            }
        };
        let Some(job) = config.find_job(&id).filter(|j| j.enabled).cloned() else {
            tracing::warn!("⚠️ Schedule '{}' is gone or disabled, skipping", id);
            return;
        };
        if let Err(e) = self.execute_sequence(&job, &config, false).await {
            tracing::error!("❌ Scheduled import '{}' failed: {}", job.display_name(), e);
        }
        drop(entry);
    }

    /// History record, run (with retry unless manual), then success or
    /// failure bookkeeping. The caller holds the guard.
    async fn execute_sequence(
        &self,
        job: &JobDefinition,
        config: &CsvSyncConfig,
        manual: bool,
    ) -> Result<ImportSummary, ImportError> {
        let deps = &self.inner.deps;

        let record_id = match deps.history.create(&job.id, job.display_name()) {
            Ok(id) => id,
            Err(e) => {
                let err = ImportError::History(e);
                self.record_failure(&job.id, job.display_name(), &err, manual).await;
                return Err(err);
            }
        };

        let result = if manual {
            deps.runner.execute(job, config).await
        } else {
            retry(&job.id, &job.retry, |_| deps.runner.execute(job, config)).await
        };

        match result {
            Ok(summary) => {
                if let Err(e) = deps.history.complete(&record_id, &summary) {
                    tracing::error!("❌ Could not mark import {} completed: {}", record_id, e);
                }
                self.reset_failures(&job.id);
                tracing::info!("✅ Import '{}' completed", job.display_name());
                self.auto_backup(job, config, &summary).await;
                Ok(summary)
            }
            Err(err) => {
                if let Err(e) = deps.history.fail(&record_id, &err.to_string()) {
                    tracing::error!("❌ Could not mark import {} failed: {}", record_id, e);
                }
                self.record_failure(&job.id, job.display_name(), &err, manual).await;
                Err(err)
            }
        }
    }

    /// A fire whose config cannot be read still leaves a FAILED record and
    /// alerts. The schedule name is unknown, so the id stands in for it.
    async fn record_unloadable(&self, id: &str, err: &ImportError) {
        let history = &self.inner.deps.history;
        match history.create(id, id) {
            Ok(record_id) => {
                if let Err(e) = history.fail(&record_id, &err.to_string()) {
                    tracing::error!("❌ Could not mark import {} failed: {}", record_id, e);
                }
            }
            Err(e) => tracing::error!("❌ Could not record failed import '{}': {}", id, e),
        }
        self.record_failure(id, id, err, false).await;
    }

    async fn record_failure(&self, id: &str, name: &str, err: &ImportError, manual: bool) {
        let alerter = &self.inner.deps.alerter;
        let message = err.to_string();
        alerter.generate_failure_alert(id, name, &message).await;

        let count = self.increment_failures(id);
        if count >= CONSECUTIVE_FAILURE_THRESHOLD {
            alerter
                .generate_consecutive_failure_alert(id, name, count, &message)
                .await;
        }
        if !manual && err.is_reauth_required() {
            alerter.generate_gmail_reauth_alert(id, &message).await;
        }
    }

    async fn auto_backup(&self, job: &JobDefinition, config: &CsvSyncConfig, summary: &ImportSummary) {
        let deps = &self.inner.deps;
        let Some(backup) = deps.backup.as_ref() else {
            return;
        };
        if !job.auto_backup_after_import.enabled {
            return;
        }
        let provider = match deps
            .providers
            .create(config.storage.provider, &config.storage.options, deps.tokens.clone())
            .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("❌ Auto-backup for '{}' skipped: {}", job.id, e);
                return;
            }
        };
        let report = backup.run(job, summary, provider.as_ref()).await;
        if !report.is_clean() {
            tracing::warn!(
                "⚠️ Auto-backup for '{}' finished with {} failure(s)",
                job.id,
                report.failed.len()
            );
        }
    }

    fn increment_failures(&self, id: &str) -> u32 {
        match self.inner.failures.lock() {
            Ok(mut failures) => {
                let count = failures.entry(id.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => 0,
        }
    }

    fn reset_failures(&self, id: &str) {
        if let Ok(mut failures) = self.inner.failures.lock() {
            failures.remove(id);
        }
    }

    // ─── Accessors ────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.inner
            .registrations
            .lock()
            .map(|r| r.running)
            .unwrap_or(false)
    }

    /// Ids of schedules with a live trigger.
    pub fn registered_jobs(&self) -> Vec<String> {
        self.inner
            .registrations
            .lock()
            .map(|r| r.jobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn consecutive_failures(&self, id: &str) -> u32 {
        self.inner
            .failures
            .lock()
            .map(|f| f.get(id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_executing(&self, id: &str) -> bool {
        self.inner.guard.contains(id)
    }

    pub fn history(&self) -> Arc<ImportHistory> {
        self.inner.deps.history.clone()
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.inner.deps.config_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertKind;
    use crate::history::{HistoryFilter, ImportStatus};
    use crate::testing::{BrokenExporter, FakeRunner, harness, harness_with_backup, job};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[test]
    fn test_guard_is_exclusive_per_id() {
        let guard = Arc::new(ExecutionGuard::new());
        let a = guard.try_acquire("a").unwrap();
        assert!(guard.try_acquire("a").is_none());
        let _b = guard.try_acquire("b").unwrap();
        assert!(guard.contains("a"));
        drop(a);
        assert!(!guard.contains("a"));
        assert!(guard.try_acquire("a").is_some());
    }

    #[test]
    fn test_stale_entry_cannot_release_newer_acquisition() {
        let guard = Arc::new(ExecutionGuard::new());
        let stale = guard.try_acquire("a").unwrap();
        guard.clear();
        let fresh = guard.try_acquire("a").unwrap();
        drop(stale);
        assert!(guard.contains("a"));
        drop(fresh);
        assert!(!guard.contains("a"));
    }

    #[test]
    fn test_poisoned_guard_still_acquires() {
        let guard = Arc::new(ExecutionGuard::new());
        let poisoner = guard.clone();
        std::thread::spawn(move || {
            let _entries = poisoner.entries.lock().unwrap();
            panic!("holder crashed");
        })
        .join()
        .unwrap_err();

        let entry = guard.try_acquire("a").expect("poisoned lock must not read as held");
        assert!(guard.contains("a"));
        drop(entry);
        assert!(!guard.contains("a"));
    }

    #[test]
    fn test_entry_outliving_guard_is_harmless() {
        let guard = Arc::new(ExecutionGuard::new());
        let entry = guard.try_acquire("a").unwrap();
        drop(guard);
        assert_eq!(entry.id(), "a");
        drop(entry);
    }

    fn records(history: &ImportHistory) -> Vec<crate::history::ImportHistoryRecord> {
        history.query(&HistoryFilter::default()).unwrap()
    }

    #[tokio::test]
    async fn test_second_manual_run_is_rejected_while_first_is_in_flight() {
        let hold = Arc::new(Notify::new());
        let runner = FakeRunner {
            hold: Some(hold.clone()),
            ..Default::default()
        };
        let h = harness(vec![job("a", "0 4 * * *")], runner);

        let first = {
            let scheduler = h.scheduler.clone();
            tokio::spawn(async move { scheduler.run_import("a").await })
        };
        while !h.scheduler.is_executing("a") || h.runner.attempts() == 0 {
            tokio::task::yield_now().await;
        }

        let err = h.scheduler.run_import("a").await.unwrap_err();
        assert!(matches!(err, ImportError::AlreadyRunning(_)));
        assert_eq!(err.status_code(), 409);
        assert_eq!(records(&h.history).len(), 1);

        hold.notify_one();
        first.await.unwrap().unwrap();
        assert!(!h.scheduler.is_executing("a"));
    }

    #[tokio::test]
    async fn test_guard_released_after_failure() {
        let h = harness(vec![job("a", "0 4 * * *")], FakeRunner::failing());
        assert!(h.scheduler.run_import("a").await.is_err());
        assert!(!h.scheduler.is_executing("a"));

        let err = h.scheduler.run_import("a").await.unwrap_err();
        assert!(matches!(err, ImportError::Config(_)), "{err}");
        assert_eq!(h.runner.attempts(), 2);
    }

    #[tokio::test]
    async fn test_manual_run_lookup_errors() {
        let mut disabled = job("off", "0 4 * * *");
        disabled.enabled = false;
        let h = harness(vec![disabled], FakeRunner::default());

        let missing = h.scheduler.run_import("nope").await.unwrap_err();
        assert!(matches!(missing, ImportError::NotFound(_)));
        assert_eq!(missing.status_code(), 404);

        let off = h.scheduler.run_import("off").await.unwrap_err();
        assert!(matches!(off, ImportError::Disabled(_)));
        assert_eq!(h.runner.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_run_retries_up_to_bound() {
        let mut j = job("a", "0 4 * * *");
        j.retry.max_retries = 2;
        j.retry.retry_interval_secs = 1;
        j.retry.exponential_backoff = false;
        let h = harness(vec![j.clone()], FakeRunner::failing());
        let config = h.store.load().unwrap();

        let err = h.scheduler.execute_sequence(&j, &config, false).await.unwrap_err();
        assert_eq!(h.runner.attempts(), 3);
        assert!(err.to_string().contains("3 attempts"), "{err}");

        let rows = records(&h.history);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ImportStatus::Failed);
        assert!(rows[0].error_message.as_deref().unwrap().contains("3 attempts"));
    }

    #[tokio::test]
    async fn test_manual_run_makes_single_attempt() {
        let mut j = job("a", "0 4 * * *");
        j.retry.max_retries = 2;
        let h = harness(vec![j], FakeRunner::failing());
        let err = h.scheduler.run_import("a").await.unwrap_err();
        assert_eq!(h.runner.attempts(), 1);
        assert!(!err.to_string().contains("attempts"));
    }

    #[tokio::test]
    async fn test_consecutive_failures_escalate_once_and_reset() {
        let h = harness(vec![job("a", "0 4 * * *")], FakeRunner::failing());
        for _ in 0..3 {
            assert!(h.scheduler.run_import("a").await.is_err());
        }
        assert_eq!(h.alerts.count(AlertKind::ImportFailure), 3);
        assert_eq!(h.alerts.count(AlertKind::ConsecutiveFailure), 1);
        let escalation = h
            .alerts
            .alerts()
            .into_iter()
            .find(|a| a.kind == AlertKind::ConsecutiveFailure)
            .unwrap();
        assert_eq!(escalation.details["failureCount"], 3);
        assert_eq!(escalation.details["lastError"], "Configuration error: download failed");

        h.runner.fail.store(false, Ordering::SeqCst);
        h.scheduler.run_import("a").await.unwrap();
        assert_eq!(h.scheduler.consecutive_failures("a"), 0);

        h.runner.fail.store(true, Ordering::SeqCst);
        assert!(h.scheduler.run_import("a").await.is_err());
        assert_eq!(h.scheduler.consecutive_failures("a"), 1);
        assert_eq!(h.alerts.count(AlertKind::ConsecutiveFailure), 1);
    }

    #[tokio::test]
    async fn test_success_completes_history() {
        let h = harness(vec![job("a", "0 4 * * *")], FakeRunner::default());
        let summary = h.scheduler.run_import("a").await.unwrap();
        let rows = records(&h.history);
        assert_eq!(rows[0].status, ImportStatus::Completed);
        assert_eq!(rows[0].summary.as_ref(), Some(&summary));
        assert!(h.alerts.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_reauth_alert_only_for_scheduled_runs() {
        let mut j = job("a", "0 4 * * *");
        j.retry.max_retries = 0;
        let runner = FakeRunner::default();
        runner.reauth.store(true, Ordering::SeqCst);
        let h = harness(vec![j.clone()], runner);

        assert!(h.scheduler.run_import("a").await.is_err());
        assert_eq!(h.alerts.count(AlertKind::GmailOAuthExpired), 0);

        let config = h.store.load().unwrap();
        assert!(h.scheduler.execute_sequence(&j, &config, false).await.is_err());
        assert_eq!(h.alerts.count(AlertKind::GmailOAuthExpired), 1);
    }

    #[tokio::test]
    async fn test_backup_failure_keeps_import_completed() {
        let mut j = job("a", "0 4 * * *");
        j.auto_backup_after_import.enabled = true;
        j.auto_backup_after_import.targets = vec![csvsync_core::BackupTargetKind::All];
        let h = harness_with_backup(vec![j], FakeRunner::default(), Some(Arc::new(BrokenExporter)));

        h.scheduler.run_import("a").await.unwrap();
        assert_eq!(records(&h.history)[0].status, ImportStatus::Completed);
        assert!(h.storage.paths().is_empty());
        assert_eq!(h.scheduler.consecutive_failures("a"), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness(vec![job("a", "*/5 * * * *")], FakeRunner::default());
        h.scheduler.stop();
        h.scheduler.stop();
        h.scheduler.start().unwrap();
        h.scheduler.start().unwrap();
        assert!(h.scheduler.is_running());
        h.scheduler.stop();
        h.scheduler.stop();
        assert!(!h.scheduler.is_running());
        assert!(h.scheduler.registered_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_start_skips_invalid_and_disabled_schedules() {
        let mut off = job("off", "0 4 * * *");
        off.enabled = false;
        let h = harness(
            vec![job("ok", "0 4 * * *"), job("bad", "99 * * * *"), off],
            FakeRunner::default(),
        );
        h.scheduler.start().unwrap();
        assert_eq!(h.scheduler.registered_jobs(), vec!["ok".to_string()]);
        h.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_drops_removed_schedule() {
        let h = harness(vec![job("a", "*/5 * * * *")], FakeRunner::default());
        h.scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert!(h.runner.attempts() >= 1);

        h.store
            .update(|config| {
                config.csv_imports.clear();
                Ok(())
            })
            .unwrap();
        h.scheduler.reload().unwrap();
        assert!(h.scheduler.registered_jobs().is_empty());

        // Let any execution spawned before the reload finish.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = h.runner.attempts();
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(h.runner.attempts(), before);
        h.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_keeps_in_flight_execution_exclusive() {
        let hold = Arc::new(Notify::new());
        let runner = FakeRunner {
            hold: Some(hold.clone()),
            ..Default::default()
        };
        let h = harness(vec![job("a", "*/5 * * * *")], runner);
        h.scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(6 * 60)).await;
        assert_eq!(h.runner.attempts(), 1);
        assert!(h.scheduler.is_executing("a"));

        // A refreshed token rewrites the config, which triggers a reload.
        h.store
            .update(|config| {
                config
                    .storage
                    .options
                    .set_access_token(csvsync_core::StorageProviderKind::Dropbox, "fresh");
                Ok(())
            })
            .unwrap();
        h.scheduler.reload().unwrap();
        assert!(h.scheduler.is_executing("a"));

        tokio::time::sleep(Duration::from_secs(15 * 60)).await;
        assert_eq!(h.runner.attempts(), 1);
        assert_eq!(records(&h.history).len(), 1);

        hold.notify_one();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!h.scheduler.is_executing("a"));
        h.scheduler.stop();
    }

    #[tokio::test]
    async fn test_scheduled_fire_with_unreadable_config_is_recorded() {
        let h = harness(vec![job("a", "*/5 * * * *")], FakeRunner::default());
        std::fs::write(h.store.path(), "csv_imports = [ broken").unwrap();

        let entry = h.scheduler.inner.guard.try_acquire("a").unwrap();
        h.scheduler.run_scheduled(entry).await;

        let rows = records(&h.history);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ImportStatus::Failed);
        assert_eq!(rows[0].schedule_id, "a");
        assert!(rows[0].error_message.is_some());
        assert_eq!(h.alerts.count(AlertKind::ImportFailure), 1);
        assert_eq!(h.scheduler.consecutive_failures("a"), 1);
        assert_eq!(h.runner.attempts(), 0);
        assert!(!h.scheduler.is_executing("a"));
    }

    #[tokio::test]
    async fn test_reload_picks_up_alert_targets() {
        let h = harness(vec![job("a", "0 4 * * *")], FakeRunner::default());
        h.scheduler.start().unwrap();
        assert_eq!(h.scheduler.inner.deps.alerter.sink_names(), vec!["memory"]);

        h.store
            .update(|config| {
                config.alerts.targets.push(csvsync_core::AlertTarget::Discord {
                    webhook_url: "http://127.0.0.1:9/discord".into(),
                });
                Ok(())
            })
            .unwrap();
        h.scheduler.reload().unwrap();
        assert_eq!(
            h.scheduler.inner.deps.alerter.sink_names(),
            vec!["memory", "discord"]
        );
        h.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_fire_skipped_while_running() {
        let hold = Arc::new(Notify::new());
        let runner = FakeRunner {
            hold: Some(hold.clone()),
            ..Default::default()
        };
        let h = harness(vec![job("a", "*/5 * * * *")], runner);
        h.scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(21 * 60)).await;
        // The first fire is still held; later fires were dropped.
        assert_eq!(h.runner.attempts(), 1);
        assert_eq!(records(&h.history).len(), 1);

        hold.notify_one();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!h.scheduler.is_executing("a"));
        h.scheduler.stop();
    }
}
