//! Completion notification seam. Delivery transports live outside the
//! core; the engine only hands the summary payload to whatever was
//! injected. Failures are logged and never affect the exit code.

use async_trait::async_trait;

use recon_core::EngineError;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &serde_json::Value) -> Result<(), EngineError>;
}

/// Default when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _summary: &serde_json::Value) -> Result<(), EngineError> {
        Ok(())
    }
}
