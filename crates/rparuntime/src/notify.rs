use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Payload describing an unrecoverable step failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub flow_name: String,
    pub app_name: String,
    pub step_name: String,
    pub step_index: usize,
    pub error_message: String,
}

/// Receives step failures; delivery is best effort
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, failure: &StepFailure);
}

/// Posts failures as JSON to a webhook without waiting for the response
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, failure: &StepFailure) {
        let request = self.client.post(&self.url).json(failure);
        let url = self.url.clone();
        let step = failure.step_name.clone();

        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!("Webhook {} answered {} for step {}", url, response.status(), step);
                }
                Ok(_) => tracing::debug!("Failure notification for step {} delivered", step),
                Err(e) => tracing::warn!("Webhook {} unreachable: {}", url, e),
            }
        });
    }
}

/// Sink that only logs
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, failure: &StepFailure) {
        tracing::error!(
            flow = %failure.flow_name,
            step = %failure.step_name,
            index = failure.step_index,
            "Step failed: {}",
            failure.error_message
        );
    }
}
