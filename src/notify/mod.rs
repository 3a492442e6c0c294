// Outbound notifications: cycle digests and failure alerts

pub mod digest;
pub mod telegram;

pub use digest::{format_cycle_digest, format_failure};
pub use telegram::{TelegramConfig, TelegramNotifier};

use anyhow::Result;
use async_trait::async_trait;

/// Delivery channel for digests. Callers log failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        for line in message.lines() {
            tracing::info!("📣 {}", line);
        }
        Ok(())
    }
}

/// Send and swallow errors
pub async fn notify_quietly(notifier: &dyn Notifier, message: &str) {
    if let Err(e) = notifier.notify(message).await {
        tracing::warn!("Notification failed: {:#}", e);
    }
}
