//! OpenAI-compatible chat-completions client that returns trading decisions
//!
//! Transport errors and rate limiting (429) are retried with exponential
//! backoff. A reply that does not parse is returned as an error immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::parse::parse_decisions;
use super::{DecisionError, DecisionService};
use crate::models::Decision;

/// Upper bound for a single backoff sleep
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are a professional crypto derivatives trader. \
Follow the risk rules exactly. Always respond with valid JSON only, no markdown formatting.";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            max_retries: 3,
            retry_base_delay_ms: 2500,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`, capped
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_RETRY_DELAY)
}

pub struct LlmDecisionClient {
    client: reqwest::Client,
    config: LlmConfig,
    symbol: String,
}

impl LlmDecisionClient {
    /// `symbol` fills decisions that omit one
    pub fn new(config: LlmConfig, symbol: impl Into<String>) -> Result<Self, DecisionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DecisionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config,
            symbol: symbol.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Raw assistant text, retried on transport errors and 429
    async fn complete(&self, context: &str) -> Result<String, DecisionError> {
        let request = ChatRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: context,
                },
            ],
        };

        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(self.config.retry_base_delay_ms, attempt)).await;
            }
            attempt += 1;

            let response = match self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(
                        "Decision request failed (attempt {}/{}): {}",
                        attempt,
                        max_attempts,
                        e
                    );
                    if attempt >= max_attempts {
                        return Err(DecisionError::Transport(e.to_string()));
                    }
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();

                if status.as_u16() == 429 && attempt < max_attempts {
                    tracing::warn!(
                        "Rate limited by decision service (429), retrying (attempt {}/{})",
                        attempt,
                        max_attempts
                    );
                    continue;
                }

                return Err(DecisionError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let chat: ChatResponse = response
                .json()
                .await
                .map_err(|e| DecisionError::Parse(format!("invalid completion payload: {}", e)))?;

            return chat
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|text| !text.trim().is_empty())
                .ok_or(DecisionError::EmptyReply);
        }
    }
}

#[async_trait]
impl DecisionService for LlmDecisionClient {
    async fn decide(&self, context: &str) -> Result<Vec<Decision>, DecisionError> {
        tracing::info!("🤖 Requesting decisions from {}", self.config.model);

        let text = self.complete(context).await?;
        let decisions = parse_decisions(&text, &self.symbol)?;

        tracing::info!("  ✓ Received {} decision(s)", decisions.len());
        for d in &decisions {
            tracing::debug!(
                "    {:?} {} portion={:.3} lev={}x: {}",
                d.operation,
                d.symbol,
                d.target_portion_of_balance,
                d.leverage,
                d.reason
            );
        }
        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_base() {
        assert_eq!(backoff_delay(2500, 1), Duration::from_millis(2500));
        assert_eq!(backoff_delay(2500, 2), Duration::from_millis(5000));
        assert_eq!(backoff_delay(2500, 3), Duration::from_millis(10_000));
    }

    #[test]
    fn test_backoff_is_capped_for_large_attempts() {
        assert_eq!(backoff_delay(2500, 5), Duration::from_millis(40_000));
        assert_eq!(backoff_delay(2500, 6), MAX_RETRY_DELAY);
        // 2^99 and the product both overflow u64 without saturation
        assert_eq!(backoff_delay(2500, 100), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(u64::MAX, u32::MAX), MAX_RETRY_DELAY);
    }
}
