//! Alert generation and fan-out.
//!
//! Every alert goes to the local alert log plus whatever webhooks and script
//! the config names. Delivery failures are logged, never propagated.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csvsync_core::{AlertTarget, AlertsConfig};
use serde::{Deserialize, Serialize};

use crate::history::{AlertRecord, ImportHistory};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "csv-import-failure")]
    ImportFailure,
    #[serde(rename = "csv-import-consecutive-failure")]
    ConsecutiveFailure,
    #[serde(rename = "gmail-oauth-expired")]
    GmailOAuthExpired,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImportFailure => "csv-import-failure",
            Self::ConsecutiveFailure => "csv-import-consecutive-failure",
            Self::GmailOAuthExpired => "gmail-oauth-expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            message: message.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

/// One destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<(), String>;
}

// ─── Sinks ────────────────────────────────────────────────────────────────

/// Persists alerts in the history database.
pub struct HistoryAlertSink {
    history: Arc<ImportHistory>,
}

impl HistoryAlertSink {
    pub fn new(history: Arc<ImportHistory>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl AlertSink for HistoryAlertSink {
    fn name(&self) -> &str {
        "history"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), String> {
        self.history.record_alert(&AlertRecord {
            id: alert.id.clone(),
            kind: alert.kind.as_str().to_string(),
            message: alert.message.clone(),
            details: alert.details.clone(),
            created_at: alert.created_at,
        })
    }
}

/// Posts to a webhook, Slack or Discord endpoint.
pub struct WebhookAlertSink {
    target: AlertTarget,
    client: reqwest::Client,
}

impl WebhookAlertSink {
    pub fn new(target: AlertTarget) -> Self {
        Self {
            target,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    fn name(&self) -> &str {
        match self.target {
            AlertTarget::Webhook { .. } => "webhook",
            AlertTarget::Slack { .. } => "slack",
            AlertTarget::Discord { .. } => "discord",
        }
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), String> {
        let (url, body) = match &self.target {
            AlertTarget::Webhook { url, .. } => (
                url,
                serde_json::json!({
                    "id": alert.id,
                    "type": alert.kind.as_str(),
                    "message": alert.message,
                    "details": alert.details,
                    "timestamp": alert.created_at.to_rfc3339(),
                }),
            ),
            AlertTarget::Slack { webhook_url } => (
                webhook_url,
                serde_json::json!({
                    "text": format!("{} *{}*\n{}", kind_emoji(alert.kind), alert.kind.as_str(), alert.message),
                }),
            ),
            AlertTarget::Discord { webhook_url } => (
                webhook_url,
                serde_json::json!({
                    "embeds": [{
                        "title": format!("{} {}", kind_emoji(alert.kind), alert.kind.as_str()),
                        "description": alert.message,
                        "color": kind_color(alert.kind),
                        "footer": {
                            "text": alert.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
                        }
                    }]
                }),
            ),
        };

        let mut req = self.client.post(url).json(&body).timeout(SEND_TIMEOUT);
        if let AlertTarget::Webhook { headers, .. } = &self.target {
            for (key, value) in headers {
                req = req.header(key.as_str(), value.as_str());
            }
        }

        let resp = req
            .send()
            .await
            .map_err(|e| format!("{} send failed: {e}", self.name()))?;
        if resp.status().is_success() {
            tracing::info!("✅ {} alert sent: {}", self.name(), alert.kind.as_str());
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(format!("{} error {status}: {body}", self.name()))
        }
    }
}

fn kind_emoji(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::ImportFailure => "⚠️",
        AlertKind::ConsecutiveFailure => "🚨",
        AlertKind::GmailOAuthExpired => "🔑",
    }
}

fn kind_color(kind: AlertKind) -> u32 {
    match kind {
        AlertKind::ImportFailure => 0xFF8800,
        AlertKind::ConsecutiveFailure => 0xFF0000,
        AlertKind::GmailOAuthExpired => 0xFFCC00,
    }
}

/// Runs `<script> <kind> <message> <details-json>`.
pub struct ScriptAlertSink {
    script: String,
}

impl ScriptAlertSink {
    pub fn new(script: &str) -> Self {
        Self {
            script: shellexpand::tilde(script).into_owned(),
        }
    }
}

#[async_trait]
impl AlertSink for ScriptAlertSink {
    fn name(&self) -> &str {
        "script"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), String> {
        let mut cmd = tokio::process::Command::new(&self.script);
        cmd.arg(alert.kind.as_str())
            .arg(&alert.message)
            .arg(alert.details.to_string())
            .kill_on_drop(true);
        let output = tokio::time::timeout(SEND_TIMEOUT, cmd.output())
            .await
            .map_err(|_| format!("Alert script timed out after {}s", SEND_TIMEOUT.as_secs()))?
            .map_err(|e| format!("Alert script failed to start: {e}"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "Alert script exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

/// Collects alerts in memory.
#[derive(Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts().iter().filter(|a| a.kind == kind).count()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), String> {
        self.alerts
            .lock()
            .map_err(|e| format!("Alert lock: {e}"))?
            .push(alert.clone());
        Ok(())
    }
}

// ─── Alerter ──────────────────────────────────────────────────────────────

/// Fans alerts out to fixed sinks plus the ones the `[alerts]` section names.
pub struct ImportAlerter {
    fixed: Vec<Arc<dyn AlertSink>>,
    configured: RwLock<Vec<Arc<dyn AlertSink>>>,
}

impl ImportAlerter {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self {
            fixed: sinks,
            configured: RwLock::new(Vec::new()),
        }
    }

    /// Alert log plus every configured webhook and script.
    pub fn from_config(config: &AlertsConfig, history: Arc<ImportHistory>) -> Self {
        let alerter = Self::new(vec![Arc::new(HistoryAlertSink::new(history))]);
        alerter.reconfigure(config);
        alerter
    }

    /// Replace the webhook and script sinks. Fixed sinks are kept.
    pub fn reconfigure(&self, config: &AlertsConfig) {
        let mut sinks: Vec<Arc<dyn AlertSink>> = config
            .targets
            .iter()
            .map(|target| Arc::new(WebhookAlertSink::new(target.clone())) as Arc<dyn AlertSink>)
            .collect();
        if let Some(script) = config.script.as_deref().filter(|s| !s.trim().is_empty()) {
            sinks.push(Arc::new(ScriptAlertSink::new(script)));
        }
        *self.configured.write().unwrap_or_else(|e| e.into_inner()) = sinks;
    }

    fn sinks(&self) -> Vec<Arc<dyn AlertSink>> {
        let configured = self.configured.read().unwrap_or_else(|e| e.into_inner());
        self.fixed.iter().chain(configured.iter()).cloned().collect()
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks().iter().map(|s| s.name().to_string()).collect()
    }

    /// Deliver to every sink concurrently.
    pub async fn raise(&self, alert: Alert) {
        tracing::warn!("🚨 Alert [{}]: {}", alert.kind.as_str(), alert.message);
        let sinks = self.sinks();
        let deliveries = sinks.iter().map(|sink| {
            let alert = &alert;
            async move { (sink.name().to_string(), sink.deliver(alert).await) }
        });
        for (name, result) in futures::future::join_all(deliveries).await {
            if let Err(e) = result {
                tracing::error!("❌ Alert delivery via {} failed: {}", name, e);
            }
        }
    }

    pub async fn generate_failure_alert(&self, schedule_id: &str, schedule_name: &str, error: &str) {
        self.raise(Alert::new(
            AlertKind::ImportFailure,
            format!("CSV import '{schedule_name}' failed: {error}"),
            serde_json::json!({
                "scheduleId": schedule_id,
                "scheduleName": schedule_name,
                "error": error,
            }),
        ))
        .await;
    }

    pub async fn generate_consecutive_failure_alert(
        &self,
        schedule_id: &str,
        schedule_name: &str,
        failure_count: u32,
        last_error: &str,
    ) {
        self.raise(Alert::new(
            AlertKind::ConsecutiveFailure,
            format!("CSV import '{schedule_name}' failed {failure_count} times in a row"),
            serde_json::json!({
                "scheduleId": schedule_id,
                "scheduleName": schedule_name,
                "failureCount": failure_count,
                "lastError": last_error,
            }),
        ))
        .await;
    }

    pub async fn generate_gmail_reauth_alert(&self, schedule_id: &str, error: &str) {
        self.raise(Alert::new(
            AlertKind::GmailOAuthExpired,
            "Gmail authorization expired; re-authorize the Gmail connection",
            serde_json::json!({
                "scheduleId": schedule_id,
                "error": error,
            }),
        ))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use std::collections::BTreeMap;

    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }
        async fn deliver(&self, _alert: &Alert) -> Result<(), String> {
            Err("down".into())
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let memory = Arc::new(MemoryAlertSink::new());
        let alerter = ImportAlerter::new(vec![Arc::new(FailingSink), memory.clone()]);
        alerter.generate_failure_alert("daily", "Daily", "boom").await;
        assert_eq!(memory.count(AlertKind::ImportFailure), 1);
        assert!(memory.alerts()[0].message.contains("boom"));
    }

    #[tokio::test]
    async fn test_consecutive_alert_details() {
        let memory = Arc::new(MemoryAlertSink::new());
        let alerter = ImportAlerter::new(vec![memory.clone()]);
        alerter
            .generate_consecutive_failure_alert("daily", "Daily", 3, "last boom")
            .await;
        let alert = &memory.alerts()[0];
        assert_eq!(alert.kind, AlertKind::ConsecutiveFailure);
        assert_eq!(alert.details["failureCount"], 3);
        assert_eq!(alert.details["lastError"], "last boom");
    }

    #[tokio::test]
    async fn test_from_config_persists_to_history() {
        let history = Arc::new(ImportHistory::open_in_memory().unwrap());
        let alerter = ImportAlerter::from_config(&AlertsConfig::default(), history.clone());
        alerter.generate_gmail_reauth_alert("daily", "invalid_grant").await;
        let alerts = history.recent_alerts(5).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "gmail-oauth-expired");
    }

    #[test]
    fn test_reconfigure_replaces_only_configured_sinks() {
        let history = Arc::new(ImportHistory::open_in_memory().unwrap());
        let alerter = ImportAlerter::from_config(&AlertsConfig::default(), history);
        assert_eq!(alerter.sink_names(), vec!["history"]);

        alerter.reconfigure(&AlertsConfig {
            script: Some("/opt/alert.sh".into()),
            targets: vec![AlertTarget::Slack {
                webhook_url: "http://127.0.0.1:9/slack".into(),
            }],
        });
        assert_eq!(alerter.sink_names(), vec!["history", "slack", "script"]);

        alerter.reconfigure(&AlertsConfig::default());
        assert_eq!(alerter.sink_names(), vec!["history"]);
    }

    #[tokio::test]
    async fn test_webhook_sink_posts_json() {
        let received = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
        let sink_store = received.clone();
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<serde_json::Value>| {
                let store = sink_store.clone();
                async move {
                    store.lock().unwrap().push(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let sink = WebhookAlertSink::new(AlertTarget::Webhook {
            url: format!("http://{addr}/hook"),
            headers: BTreeMap::from([("X-Token".to_string(), "t".to_string())]),
        });
        sink.deliver(&Alert::new(AlertKind::ImportFailure, "failed", serde_json::json!({})))
            .await
            .unwrap();

        let bodies = received.lock().unwrap();
        assert_eq!(bodies[0]["type"], "csv-import-failure");
        assert_eq!(bodies[0]["message"], "failed");
    }

    #[tokio::test]
    async fn test_webhook_sink_reports_http_error() {
        let app = Router::new().route(
            "/hook",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "nope") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let sink = WebhookAlertSink::new(AlertTarget::Slack {
            webhook_url: format!("http://{addr}/hook"),
        });
        let err = sink
            .deliver(&Alert::new(AlertKind::ConsecutiveFailure, "x", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(err.starts_with("slack error 500"), "{err}");
    }

    #[test]
    fn test_kind_serializes_to_wire_name() {
        assert_eq!(
            serde_json::to_value(AlertKind::GmailOAuthExpired).unwrap(),
            "gmail-oauth-expired"
        );
    }
}
