// Decision service: prompt rendering, chat-completion client and reply parsing

pub mod client;
pub mod parse;
pub mod prompt;

pub use client::{LlmConfig, LlmDecisionClient};
pub use parse::parse_decisions;
pub use prompt::{render_context, render_template, PromptContext, DEFAULT_TEMPLATE};

use crate::models::Decision;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision service request failed: {0}")]
    Transport(String),

    #[error("decision service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decision service returned an empty reply")]
    EmptyReply,

    #[error("could not parse decisions: {0}")]
    Parse(String),
}

/// Turns a rendered market context into trading decisions
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(&self, context: &str) -> Result<Vec<Decision>, DecisionError>;
}
