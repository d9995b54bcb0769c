//! Stoppable cron triggers backed by tokio tasks.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::cron::CronSchedule;

/// Callback run on every fire. Must not block; spawn long work.
pub type FireFn = Arc<dyn Fn() + Send + Sync>;

/// A registered trigger. Dropping or stopping it cancels future fires.
pub struct CronTask {
    name: String,
    expression: String,
    handle: JoinHandle<()>,
}

impl CronTask {
    /// Spawn the timer loop. Needs a tokio runtime.
    pub fn spawn(name: &str, schedule: CronSchedule, on_fire: FireFn) -> Self {
        let task_name = name.to_string();
        let expression = schedule.expression().to_string();
        let handle = tokio::spawn(async move {
            let mut cursor = Utc::now();
            loop {
                let Some(next) = schedule.next_after(cursor) else {
                    tracing::warn!("⏹️ Cron '{}' has no further fire times", task_name);
                    break;
                };
                let wait = (next - cursor.max(Utc::now())).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                tracing::debug!("⏰ Cron '{}' fired ({})", task_name, schedule.expression());
                on_fire();
                cursor = next.max(Utc::now());
            }
        });
        Self {
            name: name.to_string(),
            expression,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Cancel future fires. Safe to call more than once.
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CronTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
