//! Operator alerts.
//!
//! The delivery channel (chat, email, pager) lives outside this crate; components
//! only hand it `(message, title, severity)`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub title: String,
    pub severity: AlertSeverity,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            title: title.into(),
            severity,
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync + fmt::Debug {
    /// Best effort; sinks swallow their own delivery failures
    async fn send_alert(&self, alert: Alert);
}

/// Writes alerts to the log stream
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send_alert(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Info => {
                tracing::info!(title = %alert.title, message = %alert.message, "📣 ALERT")
            }
            AlertSeverity::Warning => {
                tracing::warn!(title = %alert.title, message = %alert.message, "📣 ALERT")
            }
            AlertSeverity::Error => {
                tracing::error!(title = %alert.title, message = %alert.message, "📣 ALERT")
            }
        }
    }
}

/// Keeps every alert in memory; for tests and status pages
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn count_with_severity(&self, severity: AlertSeverity) -> usize {
        self.alerts
            .lock()
            .iter()
            .filter(|alert| alert.severity == severity)
            .count()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn send_alert(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}
