//! csvsync configuration model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{CsvSyncError, Result};

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvSyncConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub csv_import_history: HistoryRetentionPolicy,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default = "default_subject_patterns")]
    pub csv_import_subject_patterns: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub csv_imports: Vec<JobDefinition>,
}

impl Default for CsvSyncConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            scheduler: SchedulerSettings::default(),
            csv_import_history: HistoryRetentionPolicy::default(),
            alerts: AlertsConfig::default(),
            csv_import_subject_patterns: default_subject_patterns(),
            csv_imports: Vec::new(),
        }
    }
}

impl CsvSyncConfig {
    /// Parse a TOML document without resolving or normalizing anything.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CsvSyncError::Config(format!("Failed to parse config: {e}")))
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CsvSyncError::Serialization(format!("Failed to serialize config: {e}")))
    }

    /// Resolve `${VAR}` credential references and fold legacy keys into
    /// their namespaced counterparts. Only ever applied to in-memory copies.
    pub fn normalize(&mut self) {
        self.storage.options.resolve_env_refs();
        self.storage.options.normalize();
        for job in &mut self.csv_imports {
            job.normalize_legacy_paths();
        }
    }

    /// Structural checks that do not need the cron parser.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for job in &self.csv_imports {
            if job.id.trim().is_empty() {
                return Err(CsvSyncError::Validation("schedule id must not be empty".into()));
            }
            if !seen.insert(job.id.as_str()) {
                return Err(CsvSyncError::Validation(format!(
                    "duplicate schedule id '{}'",
                    job.id
                )));
            }
        }
        if self.csv_import_history.retention_days == 0 {
            return Err(CsvSyncError::Validation(
                "csv_import_history.retention_days must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Whether two documents register the same triggers and alert sinks.
    /// Credential-only edits (token refreshes) compare equal.
    pub fn same_schedules(&self, other: &Self) -> bool {
        self.csv_imports == other.csv_imports
            && self.scheduler == other.scheduler
            && self.csv_import_history == other.csv_import_history
            && self.alerts == other.alerts
    }

    pub fn find_job(&self, id: &str) -> Option<&JobDefinition> {
        self.csv_imports.iter().find(|j| j.id == id)
    }

    pub fn find_job_mut(&mut self, id: &str) -> Option<&mut JobDefinition> {
        self.csv_imports.iter_mut().find(|j| j.id == id)
    }

    /// Gmail subject candidates configured for a data type (blank entries dropped).
    pub fn subject_patterns_for(&self, data_type: DataType) -> Vec<String> {
        self.csv_import_subject_patterns
            .get(data_type.as_str())
            .map(|patterns| {
                patterns
                    .iter()
                    .filter(|p| !p.trim().is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ─── Storage ─────────────────────────────────────────────────────────────────

/// Which storage backend a job or the global config points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProviderKind {
    #[default]
    Local,
    Dropbox,
    Gmail,
}

impl StorageProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dropbox => "dropbox",
            Self::Gmail => "gmail",
        }
    }

    /// Remote providers are the only ones an import job may fetch from.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Dropbox | Self::Gmail)
    }
}

impl fmt::Display for StorageProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageProviderKind {
    type Err = CsvSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dropbox" => Ok(Self::Dropbox),
            "gmail" => Ok(Self::Gmail),
            other => Err(CsvSyncError::Validation(format!(
                "unknown storage provider '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProviderKind,
    #[serde(default)]
    pub options: StorageOptions,
}

/// Provider credentials and options.
///
/// The flat keys are the legacy layout and are only read. Refreshed tokens
/// are always written to the namespaced `dropbox` / `gmail` sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmail_access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmail_refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropbox: Option<DropboxOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmail: Option<GmailOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropboxOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl DropboxOptions {
    /// All four credentials present, so the legacy copies are redundant.
    pub fn is_complete(&self) -> bool {
        [&self.access_token, &self.refresh_token, &self.app_key, &self.app_secret]
            .iter()
            .all(|v| !is_blank(v))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GmailOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
}

impl GmailOptions {
    pub fn is_complete(&self) -> bool {
        [&self.client_id, &self.client_secret, &self.access_token, &self.refresh_token]
            .iter()
            .all(|v| !is_blank(v))
    }
}

impl StorageOptions {
    /// Copy legacy flat keys into the namespaced sections wherever the
    /// namespaced value is missing or blank. Legacy keys are left in place.
    pub fn normalize(&mut self) {
        let has_legacy_dropbox = [
            &self.access_token,
            &self.refresh_token,
            &self.app_key,
            &self.app_secret,
        ]
        .iter()
        .any(|v| !is_blank(v));
        if has_legacy_dropbox || self.dropbox.is_some() {
            let dropbox = self.dropbox.get_or_insert_with(DropboxOptions::default);
            fill(&mut dropbox.access_token, &self.access_token);
            fill(&mut dropbox.refresh_token, &self.refresh_token);
            fill(&mut dropbox.app_key, &self.app_key);
            fill(&mut dropbox.app_secret, &self.app_secret);
        }

        let has_legacy_gmail = [
            &self.client_id,
            &self.client_secret,
            &self.redirect_uri,
            &self.subject_pattern,
            &self.from_email,
            &self.gmail_access_token,
            &self.gmail_refresh_token,
        ]
        .iter()
        .any(|v| !is_blank(v));
        if has_legacy_gmail || self.gmail.is_some() {
            let gmail = self.gmail.get_or_insert_with(GmailOptions::default);
            fill(&mut gmail.client_id, &self.client_id);
            fill(&mut gmail.client_secret, &self.client_secret);
            fill(&mut gmail.redirect_uri, &self.redirect_uri);
            fill(&mut gmail.subject_pattern, &self.subject_pattern);
            fill(&mut gmail.from_email, &self.from_email);
            fill(&mut gmail.access_token, &self.gmail_access_token);
            fill(&mut gmail.refresh_token, &self.gmail_refresh_token);
        }
    }

    /// Drop legacy keys for each provider whose namespaced set is complete.
    /// Returns the names of the keys that were removed.
    pub fn cleanup_legacy_keys(&mut self) -> Vec<&'static str> {
        self.normalize();
        let mut removed = Vec::new();

        if self.dropbox.as_ref().is_some_and(DropboxOptions::is_complete) {
            take_key(&mut self.access_token, "access_token", &mut removed);
            take_key(&mut self.refresh_token, "refresh_token", &mut removed);
            take_key(&mut self.app_key, "app_key", &mut removed);
            take_key(&mut self.app_secret, "app_secret", &mut removed);
        }

        if self.gmail.as_ref().is_some_and(GmailOptions::is_complete) {
            take_key(&mut self.client_id, "client_id", &mut removed);
            take_key(&mut self.client_secret, "client_secret", &mut removed);
            take_key(&mut self.redirect_uri, "redirect_uri", &mut removed);
            take_key(&mut self.subject_pattern, "subject_pattern", &mut removed);
            take_key(&mut self.from_email, "from_email", &mut removed);
            take_key(&mut self.gmail_access_token, "gmail_access_token", &mut removed);
            take_key(&mut self.gmail_refresh_token, "gmail_refresh_token", &mut removed);
        }

        removed
    }

    /// Replace `${VAR}` credential values with the environment value.
    pub fn resolve_env_refs(&mut self) {
        let legacy = [
            ("access_token", &mut self.access_token),
            ("refresh_token", &mut self.refresh_token),
            ("app_key", &mut self.app_key),
            ("app_secret", &mut self.app_secret),
            ("client_id", &mut self.client_id),
            ("client_secret", &mut self.client_secret),
            ("gmail_access_token", &mut self.gmail_access_token),
            ("gmail_refresh_token", &mut self.gmail_refresh_token),
        ];
        for (key, value) in legacy {
            resolve_env_ref(key, value);
        }
        if let Some(dropbox) = self.dropbox.as_mut() {
            resolve_env_ref("dropbox.access_token", &mut dropbox.access_token);
            resolve_env_ref("dropbox.refresh_token", &mut dropbox.refresh_token);
            resolve_env_ref("dropbox.app_key", &mut dropbox.app_key);
            resolve_env_ref("dropbox.app_secret", &mut dropbox.app_secret);
        }
        if let Some(gmail) = self.gmail.as_mut() {
            resolve_env_ref("gmail.access_token", &mut gmail.access_token);
            resolve_env_ref("gmail.refresh_token", &mut gmail.refresh_token);
            resolve_env_ref("gmail.client_id", &mut gmail.client_id);
            resolve_env_ref("gmail.client_secret", &mut gmail.client_secret);
        }
    }

    /// Namespaced Dropbox credentials (empty when none configured).
    pub fn dropbox(&self) -> DropboxOptions {
        self.dropbox.clone().unwrap_or_default()
    }

    pub fn gmail(&self) -> GmailOptions {
        self.gmail.clone().unwrap_or_default()
    }

    /// Store a refreshed access token in the namespaced section.
    pub fn set_access_token(&mut self, provider: StorageProviderKind, token: &str) {
        match provider {
            StorageProviderKind::Dropbox => {
                self.dropbox
                    .get_or_insert_with(DropboxOptions::default)
                    .access_token = Some(token.to_string());
            }
            StorageProviderKind::Gmail => {
                self.gmail
                    .get_or_insert_with(GmailOptions::default)
                    .access_token = Some(token.to_string());
            }
            StorageProviderKind::Local => {}
        }
    }

    pub fn namespaced_access_token(&self, provider: StorageProviderKind) -> Option<String> {
        let token = match provider {
            StorageProviderKind::Dropbox => self.dropbox.as_ref().and_then(|d| d.access_token.clone()),
            StorageProviderKind::Gmail => self.gmail.as_ref().and_then(|g| g.access_token.clone()),
            StorageProviderKind::Local => None,
        };
        token.filter(|t| !t.trim().is_empty())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn fill(target: &mut Option<String>, legacy: &Option<String>) {
    if is_blank(target) && !is_blank(legacy) {
        *target = legacy.clone();
    }
}

fn take_key(value: &mut Option<String>, name: &'static str, removed: &mut Vec<&'static str>) {
    if value.take().is_some() {
        removed.push(name);
    }
}

fn resolve_env_ref(key: &str, value: &mut Option<String>) {
    let Some(current) = value.as_deref() else {
        return;
    };
    if !(current.starts_with("${") && current.ends_with('}')) {
        return;
    }
    let resolved =
        shellexpand::env_with_context_no_errors(current, |name| std::env::var(name).ok())
            .into_owned();
    if resolved == current {
        tracing::warn!("⚠️ Environment variable for '{}' not set, using value as-is", key);
    } else {
        tracing::debug!("🔑 Resolved '{}' from environment", key);
        *value = Some(resolved);
    }
}

// ─── Jobs ────────────────────────────────────────────────────────────────────

/// Kind of data a target carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Employees,
    Items,
    MeasuringInstruments,
    RiggingGears,
    Machines,
    CsvDashboards,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employees => "employees",
            Self::Items => "items",
            Self::MeasuringInstruments => "measuring_instruments",
            Self::RiggingGears => "rigging_gears",
            Self::Machines => "machines",
            Self::CsvDashboards => "csv_dashboards",
        }
    }

    /// Name used in mail subjects and backup paths.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Employees => "employees",
            Self::Items => "items",
            Self::MeasuringInstruments => "measuring-instruments",
            Self::RiggingGears => "rigging-gears",
            Self::Machines => "machines",
            Self::CsvDashboards => "csv-dashboards",
        }
    }

    pub fn is_dashboard(&self) -> bool {
        matches!(self, Self::CsvDashboards)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CsvSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "employees" => Ok(Self::Employees),
            "items" => Ok(Self::Items),
            "measuring_instruments" | "measuringInstruments" => Ok(Self::MeasuringInstruments),
            "rigging_gears" | "riggingGears" => Ok(Self::RiggingGears),
            "machines" => Ok(Self::Machines),
            "csv_dashboards" | "csvDashboards" => Ok(Self::CsvDashboards),
            other => Err(CsvSyncError::Validation(format!("unknown data type '{other}'"))),
        }
    }
}

/// One `{data_type, source}` pair a job downloads and ingests.
/// For dashboards `source` is the dashboard id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportTarget {
    pub data_type: DataType,
    pub source: String,
}

impl ImportTarget {
    pub fn new(data_type: DataType, source: impl Into<String>) -> Self {
        Self {
            data_type,
            source: source.into(),
        }
    }
}

/// One configured recurring import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// 5-field cron expression.
    pub schedule: String,
    /// Overrides the global storage provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<StorageProviderKind>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub replace_existing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employees_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub auto_backup_after_import: AutoBackupSettings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<ImportTarget>,
}

impl JobDefinition {
    pub fn new(id: &str, name: &str, schedule: &str, targets: Vec<ImportTarget>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            schedule: schedule.to_string(),
            provider: None,
            enabled: true,
            replace_existing: false,
            employees_path: None,
            items_path: None,
            retry: RetryPolicy::default(),
            auto_backup_after_import: AutoBackupSettings::default(),
            targets,
        }
    }

    /// Name for logs and alerts.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Targets, falling back to the legacy single-path fields.
    pub fn resolved_targets(&self) -> Vec<ImportTarget> {
        if !self.targets.is_empty() {
            return self.targets.clone();
        }
        let mut targets = Vec::new();
        if let Some(path) = self.employees_path.as_deref().filter(|p| !p.trim().is_empty()) {
            targets.push(ImportTarget::new(DataType::Employees, path));
        }
        if let Some(path) = self.items_path.as_deref().filter(|p| !p.trim().is_empty()) {
            targets.push(ImportTarget::new(DataType::Items, path));
        }
        targets
    }

    /// Move legacy paths into `targets` when no targets are declared.
    pub fn normalize_legacy_paths(&mut self) {
        if self.targets.is_empty() {
            let converted = self.resolved_targets();
            if !converted.is_empty() {
                self.targets = converted;
                self.employees_path = None;
                self.items_path = None;
            }
        }
    }

    /// Effective provider: the job override, else the global one.
    pub fn effective_provider(&self, global: StorageProviderKind) -> StorageProviderKind {
        self.provider.unwrap_or(global)
    }
}

/// Retry settings for scheduled runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "bool_true")]
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval(),
            exponential_backoff: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupTargetKind {
    Csv,
    Database,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBackupSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backup_targets")]
    pub targets: Vec<BackupTargetKind>,
}

impl Default for AutoBackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            targets: default_backup_targets(),
        }
    }
}

impl AutoBackupSettings {
    pub fn wants_csv(&self) -> bool {
        self.targets
            .iter()
            .any(|t| matches!(t, BackupTargetKind::Csv | BackupTargetKind::All))
    }

    pub fn wants_database(&self) -> bool {
        self.targets
            .iter()
            .any(|t| matches!(t, BackupTargetKind::Database | BackupTargetKind::All))
    }
}

// ─── Maintenance, scheduler, alerts ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRetentionPolicy {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_cleanup_schedule")]
    pub cleanup_schedule: String,
}

impl Default for HistoryRetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_schedule: default_cleanup_schedule(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// IANA timezone cron expressions are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Defaults to `<data_dir>/history.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_db: Option<String>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            data_dir: default_data_dir(),
            history_db: None,
        }
    }
}

impl SchedulerSettings {
    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).into_owned())
    }

    pub fn history_db_path(&self) -> PathBuf {
        match &self.history_db {
            Some(path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
            None => self.data_dir_path().join("history.db"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// External program invoked as `<script> <kind> <message> <details-json>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub targets: Vec<AlertTarget>,
}

/// Where alerts are pushed, besides the local alert log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AlertTarget {
    /// Generic HTTP webhook, JSON body.
    Webhook {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Slack {
        webhook_url: String,
    },
    Discord {
        webhook_url: String,
    },
}

fn bool_true() -> bool { true }
fn default_max_retries() -> u32 { 3 }
fn default_retry_interval() -> u64 { 60 }
fn default_backup_targets() -> Vec<BackupTargetKind> { vec![BackupTargetKind::Csv] }
fn default_retention_days() -> u32 { 90 }
fn default_cleanup_schedule() -> String { "0 2 * * *".into() }
fn default_timezone() -> String { "Asia/Tokyo".into() }
fn default_data_dir() -> String { "~/.csvsync".into() }

fn default_subject_patterns() -> BTreeMap<String, Vec<String>> {
    let entries = [
        (DataType::Employees, "従業員CSVインポート"),
        (DataType::Items, "アイテムCSVインポート"),
        (DataType::MeasuringInstruments, "計測機器CSVインポート"),
        (DataType::RiggingGears, "吊具CSVインポート"),
    ];
    entries
        .into_iter()
        .map(|(data_type, localized)| {
            let slug = data_type.slug();
            (
                data_type.as_str().to_string(),
                vec![
                    format!("[Pi5 CSV Import] {slug}"),
                    format!("[CSV Import] {slug}"),
                    format!("CSV Import - {slug}"),
                    localized.to_string(),
                ],
            )
        })
        .collect()
}
