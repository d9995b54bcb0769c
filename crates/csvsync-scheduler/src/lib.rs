//! # CSVSync Scheduler
//!
//! Cron-driven orchestration of CSV imports.
//!
//! ```text
//! CronTask fire ──► ExecutionGuard ──► history (PENDING)
//!                                        │
//!                          retry ◄── ImportExecutor ──► StorageProvider
//!                                        │                 Ingestor
//!                     ┌──────────────────┴────────────────┐
//!                 success                               failure
//!          history COMPLETED                        history FAILED
//!          reset failure streak                     failure alert
//!          auto-backup (best effort)                streak ≥ 3 → escalation
//! ```
//!
//! Manual runs go through the same guard and sequence but skip the retry
//! layer and return the error to the caller.

pub mod admin;
pub mod alerts;
pub mod backup;
pub mod cron;
pub mod error;
pub mod executor;
pub mod history;
pub mod ingest;
pub mod retry;
pub mod scheduler;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use admin::{ScheduleAdmin, SchedulePatch, validate_job};
pub use alerts::{Alert, AlertKind, AlertSink, ImportAlerter, MemoryAlertSink};
pub use backup::{AutoBackup, BackupReport};
pub use cron::{CronSchedule, parse_timezone, validate_cron, validate_schedule};
pub use error::ImportError;
pub use executor::{ImportExecutor, ImportRunner};
pub use history::{HistoryFilter, ImportHistory, ImportHistoryRecord, ImportStatus};
pub use ingest::{
    BackupExporter, DashboardInfo, DashboardIngestSummary, DashboardRetention, DatabaseDump,
    ImportSummary, Ingestor, RecordCounts, SourceMetadata,
};
pub use scheduler::{ExecutionGuard, ImportScheduler, SchedulerDeps};
pub use tasks::CronTask;
