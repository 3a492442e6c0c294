use serde::{Deserialize, Serialize};

/// OHLCV candlestick as returned by the venue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub start_time: i64, // epoch millis
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest observed market price for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub mark_price: Option<f64>,
    pub funding_rate: Option<f64>,
}

/// Wallet-level balances, fetched fresh every cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_equity: f64,
    pub available_balance: f64,
    pub used_margin: f64,
    pub maintenance_margin: f64,
}

impl AccountSnapshot {
    /// Share of equity currently locked as margin.
    ///
    /// Equity is floored at 1 so an empty account never divides by zero.
    pub fn margin_usage_ratio(&self) -> f64 {
        self.used_margin / self.total_equity.max(1.0)
    }
}

/// Direction of a held position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

/// Open position on the traded symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
    pub liq_price: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub position_index: u8,
}

/// Position lookup result, including how the venue addresses positions
#[derive(Debug, Clone, Default)]
pub struct PositionState {
    pub position: Option<Position>,
    /// True when the venue reported any entry with a non-zero position index
    pub hedge_mode: bool,
}

/// Exchange trading limits for an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub symbol: String,
    pub min_order_qty: f64,
    pub max_order_qty: Option<f64>, // None = unbounded
    pub qty_step: f64,
    pub tick_size: f64,
    pub min_price: f64,
    pub max_price: Option<f64>, // None = unbounded
    pub max_leverage: Option<f64>,
}

/// Operation requested by the decision service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Buy,
    Sell,
    Hold,
    Close,
}

/// One advisory trading decision. The order builder decides whether it becomes an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub operation: Operation,
    pub symbol: String,
    pub target_portion_of_balance: f64,
    pub leverage: u32,
    pub max_price: Option<f64>,
    pub min_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    pub reason: String,
    pub strategy: String,
}

/// Order side on the venue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    Limit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeInForce {
    GoodTilCancel,
}

/// Price feed used to trigger stop-loss / take-profit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TriggerReference {
    LastPrice,
}

/// Exchange-ready order produced by the guardrail builder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderInstruction {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: f64,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
    pub leverage: u32,
    pub position_index: Option<u8>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trigger_reference: TriggerReference,
    pub client_order_id: String,
}

/// Outcome of submitting one order
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub order: OrderInstruction,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.order_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_usage_ratio() {
        let account = AccountSnapshot {
            total_equity: 10000.0,
            available_balance: 7500.0,
            used_margin: 2500.0,
            maintenance_margin: 100.0,
        };
        assert_eq!(account.margin_usage_ratio(), 0.25);
    }

    #[test]
    fn test_margin_usage_ratio_empty_account() {
        let account = AccountSnapshot {
            total_equity: 0.0,
            used_margin: 0.5,
            ..Default::default()
        };
        // Equity floored at 1
        assert_eq!(account.margin_usage_ratio(), 0.5);
    }

    #[test]
    fn test_operation_serde_lowercase() {
        let op: Operation = serde_json::from_str("\"close\"").unwrap();
        assert_eq!(op, Operation::Close);
        assert_eq!(serde_json::to_string(&Operation::Buy).unwrap(), "\"buy\"");
    }
}
