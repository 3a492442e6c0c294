use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Notifier;

/// Telegram caps message text at 4096 characters
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct BotReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Bot API `sendMessage` notifier
pub struct TelegramNotifier {
    client: Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        let text: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.base_url.trim_end_matches('/'),
            self.config.bot_token
        );

        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.config.chat_id,
                text: &text,
                disable_web_page_preview: true,
            })
            .send()
            .await
            .context("Telegram request failed")?;

        let status = response.status();
        let reply: BotReply = response
            .json()
            .await
            .with_context(|| format!("Unreadable Telegram reply (HTTP {})", status))?;

        if !reply.ok {
            anyhow::bail!(
                "Telegram rejected message: {}",
                reply.description.unwrap_or_else(|| status.to_string())
            );
        }
        Ok(())
    }
}
