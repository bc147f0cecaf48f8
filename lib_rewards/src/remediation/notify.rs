use async_trait::async_trait;

use super::AdminNotifier;
use crate::configs::{AlertServer, AlertsConfig};

/// Posts JSON alerts to the primary webhook and falls back to the failover
/// webhook. Without configured webhooks it only logs.
pub struct WebhookNotifier {
    client: reqwest::Client,
    alerts: Option<AlertsConfig>,
    source: String,
}

impl WebhookNotifier {
    pub fn new(alerts: Option<AlertsConfig>, source: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            alerts,
            source: source.to_string(),
        }
    }

    async fn post(&self, server: &AlertServer, payload: &serde_json::Value) -> bool {
        match self.client.post(&server.host).json(payload).send().await {
            Ok(res) if res.status().is_success() => {
                tracing::info!(server = %server.name, "alert delivered");
                true
            }
            Ok(res) => {
                tracing::error!(server = %server.name, status = %res.status(), "alert rejected");
                false
            }
            Err(e) => {
                tracing::error!(server = %server.name, error = %e, "network error sending alert");
                false
            }
        }
    }
}

#[async_trait]
impl AdminNotifier for WebhookNotifier {
    async fn notify(&self, subject: &str, message: &str) {
        let Some(alerts) = &self.alerts else {
            tracing::warn!(subject, message, "no alert webhooks configured");
            return;
        };

        let payload = serde_json::json!({
            "Date": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "Info": format!("{}: {}", self.source, subject),
            "Message": message,
        });

        if self.post(&alerts.primary, &payload).await {
            return;
        }
        tracing::warn!(server = %alerts.failover.name, "primary alert failed, trying failover");
        self.post(&alerts.failover, &payload).await;
    }
}
