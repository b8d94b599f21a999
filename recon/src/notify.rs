//! Webhook delivery of the run summary. Fire-and-forget: a failed or slow
//! delivery is logged and never changes the exit code.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use pipeline::Notifier;
use recon_core::EngineError;

pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Runner(format!("webhook client: {e}")))?;
        Ok(WebhookNotifier { url, client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, summary: &serde_json::Value) -> Result<(), EngineError> {
        match self.client.post(&self.url).json(summary).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("webhook notification delivered");
                Ok(())
            }
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "webhook rejected the payload");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "webhook delivery failed");
                Ok(())
            }
        }
    }
}
