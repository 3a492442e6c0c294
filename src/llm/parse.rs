use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::DecisionError;
use crate::models::{Decision, Operation};

/// Top-level reply shapes, tried in order
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Reply {
    List(Vec<Value>),
    Wrapped { decisions: Vec<Value> },
    Single(Value),
}

/// One decision as the model wrote it, before clamping and defaults
#[derive(Debug, Deserialize)]
struct RawDecision {
    operation: String,
    #[serde(default, deserialize_with = "loose_text")]
    symbol: Option<String>,
    #[serde(
        default,
        alias = "targetPortionOfBalance",
        deserialize_with = "loose_number"
    )]
    target_portion_of_balance: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    leverage: Option<f64>,
    #[serde(default, alias = "maxPrice", deserialize_with = "loose_number")]
    max_price: Option<f64>,
    #[serde(default, alias = "minPrice", deserialize_with = "loose_number")]
    min_price: Option<f64>,
    #[serde(default, alias = "stopLossPrice", deserialize_with = "loose_number")]
    stop_loss_price: Option<f64>,
    #[serde(default, alias = "takeProfitPrice", deserialize_with = "loose_number")]
    take_profit_price: Option<f64>,
    #[serde(default, deserialize_with = "loose_text")]
    reason: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    strategy: Option<String>,
}

/// Any JSON scalar the model might put in a numeric or text field
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose {
    Number(f64),
    Text(String),
    Other(IgnoredAny),
}

/// Numeric JSON value or numeric string; anything else (or non-finite) is absent
fn loose_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Number(v)) => Some(v),
        Some(Loose::Text(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.filter(|v| v.is_finite()))
}

fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Text(s)) => Some(s),
        _ => None,
    })
}

impl RawDecision {
    fn into_decision(self, default_symbol: &str) -> Result<Decision, String> {
        let operation = parse_operation(&self.operation)
            .ok_or_else(|| format!("unknown operation '{}'", self.operation))?;

        let symbol = self
            .symbol
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default_symbol)
            .trim()
            .to_string();

        let target_portion_of_balance = self
            .target_portion_of_balance
            .map(|p| p.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        let leverage = self
            .leverage
            .map(|v| v.round().clamp(1.0, u32::MAX as f64) as u32)
            .unwrap_or(1);

        Ok(Decision {
            operation,
            symbol,
            target_portion_of_balance,
            leverage,
            max_price: self.max_price,
            min_price: self.min_price,
            stop_loss_price: self.stop_loss_price,
            take_profit_price: self.take_profit_price,
            reason: self.reason.unwrap_or_default(),
            strategy: self.strategy.unwrap_or_default(),
        })
    }
}

/// Parse a model reply into decisions.
///
/// Accepts `{"decisions": [...]}`, a single decision object or a bare array,
/// optionally wrapped in Markdown code fences. Numbers may arrive as strings.
/// `default_symbol` fills entries that omit the symbol.
pub fn parse_decisions(text: &str, default_symbol: &str) -> Result<Vec<Decision>, DecisionError> {
    let body = strip_code_fences(text);
    if body.is_empty() {
        return Err(DecisionError::EmptyReply);
    }

    let reply: Reply = serde_json::from_str(body)
        .map_err(|e| DecisionError::Parse(format!("{} (text: {})", e, truncate(body, 200))))?;

    let entries = match reply {
        Reply::List(items) => items,
        Reply::Wrapped { decisions } => decisions,
        Reply::Single(value) if value.get("decisions").is_some() => {
            return Err(DecisionError::Parse(
                "'decisions' must be an array".to_string(),
            ))
        }
        Reply::Single(value) if value.get("operation").is_some() => vec![value],
        Reply::Single(value) if value.is_object() => {
            return Err(DecisionError::Parse("missing 'decisions' array".to_string()))
        }
        Reply::Single(_) => {
            return Err(DecisionError::Parse(
                "expected object or array".to_string(),
            ))
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            serde_json::from_value::<RawDecision>(entry)
                .map_err(|e| e.to_string())
                .and_then(|raw| raw.into_decision(default_symbol))
                .map_err(|e| DecisionError::Parse(format!("decision #{}: {}", i, e)))
        })
        .collect()
}

fn parse_operation(op: &str) -> Option<Operation> {
    match op.trim().to_ascii_lowercase().as_str() {
        "buy" => Some(Operation::Buy),
        "sell" => Some(Operation::Sell),
        "hold" => Some(Operation::Hold),
        "close" => Some(Operation::Close),
        _ => None,
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let without_open = trimmed.trim_start_matches('`');
    // Drop the language tag line (```json)
    let body = match without_open.find('\n') {
        Some(idx) => &without_open[idx + 1..],
        None => without_open,
    };
    body.trim_end().trim_end_matches('`').trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
