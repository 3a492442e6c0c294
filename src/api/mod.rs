pub mod bybit;
pub mod news;

pub use bybit::{BybitClient, BybitConfig};
pub use news::{HttpNewsSource, NewsItem, NewsSource, NoNews};

use crate::models::{
    AccountSnapshot, Candle, InstrumentMeta, OrderInstruction, PositionState, Ticker,
};
use async_trait::async_trait;
use thiserror::Error;

/// Venue retCode for "leverage not modified"
pub const LEVERAGE_NOT_MODIFIED: i64 = 110043;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("venue rejected request (retCode {code}): {message}")]
    Venue { code: i64, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("request signing failed: {0}")]
    Signing(String),
}

impl ExchangeError {
    /// The venue reports the requested leverage is already in effect
    pub fn is_leverage_unchanged(&self) -> bool {
        match self {
            ExchangeError::Venue { code, message } => {
                *code == LEVERAGE_NOT_MODIFIED
                    || message.to_ascii_lowercase().contains("leverage not modified")
            }
            _ => false,
        }
    }
}

/// Read-only market and account data
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, ExchangeError>;

    async fn ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;

    async fn instrument_meta(&self, symbol: &str) -> Result<InstrumentMeta, ExchangeError>;

    async fn position(&self, symbol: &str) -> Result<PositionState, ExchangeError>;

    /// Candles for `timeframe` (e.g. "15m", "1h"); order is not guaranteed
    async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// Leverage changes
#[async_trait]
pub trait LeverageSetter: Send + Sync {
    /// Product category the venue groups symbols under (e.g. "linear")
    fn category(&self) -> &str;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;
}

/// Order placement. Returns the venue order id.
#[async_trait]
pub trait OrderGateway: LeverageSetter {
    async fn place_order(&self, order: &OrderInstruction) -> Result<String, ExchangeError>;
}
