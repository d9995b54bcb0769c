//! SQLite-backed audit trail: import executions, backups and raised alerts.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::ingest::ImportSummary;

const DEFAULT_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Pending,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One execution of a schedule, covering all of its retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportHistoryRecord {
    pub id: String,
    pub schedule_id: String,
    pub schedule_name: String,
    pub status: ImportStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<ImportSummary>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub status: Option<ImportStatus>,
    pub schedule_id: Option<String>,
    pub started_from: Option<DateTime<Utc>>,
    pub started_to: Option<DateTime<Utc>>,
    pub offset: u32,
    pub limit: u32,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            status: None,
            schedule_id: None,
            started_from: None,
            started_to: None,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// One backup attempt, recorded separately from the import it followed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub schedule_id: Option<String>,
    pub target: String,
    pub source: String,
    pub label: String,
    pub path: String,
    pub hash: Option<String>,
    pub size_bytes: Option<u64>,
    pub status: ImportStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// What a backup attempt writes and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBackup<'a> {
    pub schedule_id: Option<&'a str>,
    pub target: &'a str,
    pub source: &'a str,
    pub label: &'a str,
    pub path: &'a str,
}

/// A persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub kind: String,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct ImportHistory {
    conn: Mutex<rusqlite::Connection>,
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

impl ImportHistory {
    /// Open or create the history database.
    pub fn open(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| format!("History dir: {e}"))?;
        }
        let conn = rusqlite::Connection::open(path).map_err(|e| format!("DB open: {e}"))?;
        let history = Self {
            conn: Mutex::new(conn),
        };
        history.migrate()?;
        Ok(history)
    }

    pub fn open_in_memory() -> Result<Self, String> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| format!("DB open: {e}"))?;
        let history = Self {
            conn: Mutex::new(conn),
        };
        history.migrate()?;
        Ok(history)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, String> {
        self.conn.lock().map_err(|e| format!("History lock: {e}"))
    }

    fn migrate(&self) -> Result<(), String> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS import_history (
                id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                schedule_name TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'PENDING',
                started_at TEXT NOT NULL,
                finished_at TEXT,
                summary TEXT,                    -- JSON ImportSummary
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_import_history_schedule
                ON import_history(schedule_id, started_at);

            CREATE TABLE IF NOT EXISTS backup_history (
                id TEXT PRIMARY KEY,
                operation TEXT NOT NULL DEFAULT 'BACKUP',
                schedule_id TEXT,
                target TEXT NOT NULL,            -- 'csv' or 'database'
                source TEXT NOT NULL,
                label TEXT NOT NULL,
                path TEXT NOT NULL,
                hash TEXT,
                size_bytes INTEGER,
                status TEXT NOT NULL DEFAULT 'PENDING',
                started_at TEXT NOT NULL,
                finished_at TEXT,
                error_message TEXT
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| format!("Migration: {e}"))
    }

    // ─── Imports ──────────────────────────────────────────────

    /// Insert a PENDING record and return its id.
    pub fn create(&self, schedule_id: &str, schedule_name: &str) -> Result<String, String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn()?
            .execute(
                "INSERT INTO import_history (id, schedule_id, schedule_name, status, started_at)
                 VALUES (?1, ?2, ?3, 'PENDING', ?4)",
                params![id, schedule_id, schedule_name, ts(Utc::now())],
            )
            .map_err(|e| format!("Insert history: {e}"))?;
        Ok(id)
    }

    pub fn complete(&self, id: &str, summary: &ImportSummary) -> Result<(), String> {
        let json = serde_json::to_string(summary).map_err(|e| format!("Summary JSON: {e}"))?;
        self.finish(id, ImportStatus::Completed, Some(json), None)
    }

    pub fn fail(&self, id: &str, error_message: &str) -> Result<(), String> {
        self.finish(id, ImportStatus::Failed, None, Some(error_message))
    }

    fn finish(
        &self,
        id: &str,
        status: ImportStatus,
        summary: Option<String>,
        error_message: Option<&str>,
    ) -> Result<(), String> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE import_history SET status = ?1, finished_at = ?2, summary = ?3, error_message = ?4
                 WHERE id = ?5",
                params![status.as_str(), ts(Utc::now()), summary, error_message, id],
            )
            .map_err(|e| format!("Update history: {e}"))?;
        if changed == 0 {
            return Err(format!("History record not found: {id}"));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<ImportHistoryRecord>, String> {
        self.conn()?
            .query_row(
                "SELECT id, schedule_id, schedule_name, status, started_at, finished_at, summary, error_message
                 FROM import_history WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()
            .map_err(|e| format!("Query history: {e}"))
    }

    /// Filtered page of records, newest first.
    pub fn query(&self, filter: &HistoryFilter) -> Result<Vec<ImportHistoryRecord>, String> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(schedule_id) = &filter.schedule_id {
            clauses.push("schedule_id = ?");
            values.push(schedule_id.clone());
        }
        if let Some(from) = filter.started_from {
            clauses.push("started_at >= ?");
            values.push(ts(from));
        }
        if let Some(to) = filter.started_to {
            clauses.push("started_at <= ?");
            values.push(ts(to));
        }

        let mut sql = String::from(
            "SELECT id, schedule_id, schedule_name, status, started_at, finished_at, summary, error_message
             FROM import_history",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        let limit = if filter.limit == 0 { DEFAULT_LIMIT } else { filter.limit };
        sql.push_str(&format!(
            " ORDER BY started_at DESC LIMIT {} OFFSET {}",
            limit, filter.offset
        ));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(|e| format!("Prepare: {e}"))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), row_to_record)
            .map_err(|e| format!("Query history: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Read history: {e}"))
    }

    /// Delete import records finished (or started, if unfinished) more than
    /// `days` ago. Returns how many were removed.
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize, String> {
        let cutoff = Duration::try_days(i64::from(days))
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .map(ts)
            .ok_or_else(|| format!("Retention of {days} days is out of range"))?;
        self.conn()?
            .execute(
                "DELETE FROM import_history WHERE COALESCE(finished_at, started_at) < ?1",
                params![cutoff],
            )
            .map_err(|e| format!("Cleanup history: {e}"))
    }

    // ─── Backups ──────────────────────────────────────────────

    pub fn create_backup(&self, backup: &NewBackup<'_>) -> Result<String, String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn()?
            .execute(
                "INSERT INTO backup_history (id, operation, schedule_id, target, source, label, path, status, started_at)
                 VALUES (?1, 'BACKUP', ?2, ?3, ?4, ?5, ?6, 'PENDING', ?7)",
                params![
                    id,
                    backup.schedule_id,
                    backup.target,
                    backup.source,
                    backup.label,
                    backup.path,
                    ts(Utc::now())
                ],
            )
            .map_err(|e| format!("Insert backup: {e}"))?;
        Ok(id)
    }

    pub fn complete_backup(&self, id: &str, hash: &str, size_bytes: u64) -> Result<(), String> {
        self.conn()?
            .execute(
                "UPDATE backup_history SET status = 'COMPLETED', finished_at = ?1, hash = ?2, size_bytes = ?3
                 WHERE id = ?4",
                params![ts(Utc::now()), hash, size_bytes as i64, id],
            )
            .map_err(|e| format!("Update backup: {e}"))?;
        Ok(())
    }

    pub fn fail_backup(&self, id: &str, error_message: &str) -> Result<(), String> {
        self.conn()?
            .execute(
                "UPDATE backup_history SET status = 'FAILED', finished_at = ?1, error_message = ?2
                 WHERE id = ?3",
                params![ts(Utc::now()), error_message, id],
            )
            .map_err(|e| format!("Update backup: {e}"))?;
        Ok(())
    }

    pub fn backups_for(&self, schedule_id: &str) -> Result<Vec<BackupRecord>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, schedule_id, target, source, label, path, hash, size_bytes, status,
                        started_at, finished_at, error_message
                 FROM backup_history WHERE schedule_id = ?1 ORDER BY started_at",
            )
            .map_err(|e| format!("Prepare: {e}"))?;
        let rows = stmt
            .query_map(params![schedule_id], |row| {
                let size: Option<i64> = row.get(7)?;
                let status: String = row.get(8)?;
                let started: String = row.get(9)?;
                let finished: Option<String> = row.get(10)?;
                Ok(BackupRecord {
                    id: row.get(0)?,
                    schedule_id: row.get(1)?,
                    target: row.get(2)?,
                    source: row.get(3)?,
                    label: row.get(4)?,
                    path: row.get(5)?,
                    hash: row.get(6)?,
                    size_bytes: size.map(|s| s as u64),
                    status: ImportStatus::parse(&status).unwrap_or(ImportStatus::Pending),
                    started_at: parse_ts(&started),
                    finished_at: finished.as_deref().map(parse_ts),
                    error_message: row.get(11)?,
                })
            })
            .map_err(|e| format!("Query backups: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Read backups: {e}"))
    }

    // ─── Alerts ───────────────────────────────────────────────

    pub fn record_alert(&self, alert: &AlertRecord) -> Result<(), String> {
        self.conn()?
            .execute(
                "INSERT INTO alerts (id, kind, message, details, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    alert.id,
                    alert.kind,
                    alert.message,
                    alert.details.to_string(),
                    ts(alert.created_at)
                ],
            )
            .map_err(|e| format!("Insert alert: {e}"))?;
        Ok(())
    }

    pub fn recent_alerts(&self, limit: u32) -> Result<Vec<AlertRecord>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, kind, message, details, created_at FROM alerts
                 ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(|e| format!("Prepare: {e}"))?;
        let rows = stmt
            .query_map(params![limit], |row| {
                let details: String = row.get(3)?;
                let created: String = row.get(4)?;
                Ok(AlertRecord {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    message: row.get(2)?,
                    details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
                    created_at: parse_ts(&created),
                })
            })
            .map_err(|e| format!("Query alerts: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Read alerts: {e}"))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImportHistoryRecord> {
    let status: String = row.get(3)?;
    let started: String = row.get(4)?;
    let finished: Option<String> = row.get(5)?;
    let summary: Option<String> = row.get(6)?;
    Ok(ImportHistoryRecord {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        schedule_name: row.get(2)?,
        status: ImportStatus::parse(&status).unwrap_or(ImportStatus::Pending),
        started_at: parse_ts(&started),
        finished_at: finished.as_deref().map(parse_ts),
        summary: summary.and_then(|s| serde_json::from_str(&s).ok()),
        error_message: row.get(7)?,
    })
}
