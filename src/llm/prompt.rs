use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::api::NewsItem;
use crate::indicators::TimeframeIndicators;
use crate::models::{AccountSnapshot, Candle, InstrumentMeta, PositionSide, PositionState, Ticker};

/// Template shipped with the binary, used when no template path is configured
pub const DEFAULT_TEMPLATE: &str = include_str!("../../prompts/decision.md");

/// Number of recent candles listed verbatim in the prompt
const PROMPT_CANDLES: usize = 20;

const DECISION_SCHEMA: &str = r#"{"decisions": [{
  "operation": "buy | sell | hold | close",
  "symbol": "string",
  "target_portion_of_balance": "number 0..1",
  "leverage": "integer >= 1",
  "max_price": "number, required for buy",
  "min_price": "number, required for sell",
  "stop_loss_price": "number, required for buy/sell",
  "take_profit_price": "number, required for buy/sell",
  "reason": "short string",
  "strategy": "short string"
}]}"#;

/// Everything a cycle knows when it asks for decisions
pub struct PromptContext<'a> {
    pub symbol: &'a str,
    pub now: DateTime<Utc>,
    pub account: &'a AccountSnapshot,
    pub ticker: &'a Ticker,
    pub instrument: &'a InstrumentMeta,
    pub position: &'a PositionState,
    pub indicators: &'a [TimeframeIndicators],
    /// Sorted candles of the shortest timeframe
    pub recent_candles: &'a [Candle],
    pub candle_timeframe: &'a str,
    pub news: &'a [NewsItem],
    pub leverage_ceiling: u32,
}

/// Render each placeholder value for the template
pub fn render_context(ctx: &PromptContext<'_>) -> HashMap<&'static str, String> {
    let mut fields = HashMap::new();

    fields.insert("symbol", ctx.symbol.to_string());
    fields.insert("timestamp", ctx.now.format("%Y-%m-%d %H:%M:%S").to_string());
    fields.insert("account", format_account(ctx.account));
    fields.insert("position", format_position(ctx.position));
    fields.insert("market", format_market(ctx.ticker));
    fields.insert("instrument", format_instrument(ctx.instrument));
    fields.insert("indicators", format_indicators(ctx.indicators));
    fields.insert("candles", format_candles(ctx.recent_candles));
    fields.insert("candle_timeframe", ctx.candle_timeframe.to_string());
    fields.insert("news", format_news(ctx.news));
    fields.insert("max_leverage", ctx.leverage_ceiling.to_string());
    fields.insert("schema", DECISION_SCHEMA.to_string());

    fields
}

/// Replace `{{name}}` placeholders. Unknown names are kept verbatim and logged.
pub fn render_template(template: &str, fields: &HashMap<&'static str, String>) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match fields.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        tracing::warn!("Unknown prompt placeholder '{{{{{}}}}}' left in place", name);
                        out.push_str(&rest[start..start + 2 + end + 2]);
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn format_account(account: &AccountSnapshot) -> String {
    format!(
        "- Total equity: {:.2} USDT\n- Available balance: {:.2} USDT\n- Used margin: {:.2} USDT\n- Maintenance margin: {:.2} USDT\n- Margin usage: {:.1}%",
        account.total_equity,
        account.available_balance,
        account.used_margin,
        account.maintenance_margin,
        account.margin_usage_ratio() * 100.0
    )
}

fn format_position(state: &PositionState) -> String {
    let mode = if state.hedge_mode { "hedge" } else { "one-way" };
    match &state.position {
        None => format!("Flat (position mode: {})", mode),
        Some(p) => {
            let side = match p.side {
                PositionSide::Long => "LONG",
                PositionSide::Short => "SHORT",
            };
            format!(
                "- {} {} @ {} ({}x, mode: {})\n- Unrealized PnL: {:.2}\n- Liquidation: {}\n- Take profit: {}\n- Stop loss: {}",
                side,
                p.size,
                p.entry_price,
                p.leverage,
                mode,
                p.unrealized_pnl,
                opt(p.liq_price),
                opt(p.take_profit),
                opt(p.stop_loss)
            )
        }
    }
}

fn format_market(ticker: &Ticker) -> String {
    let mut text = format!("- Last price: {}", ticker.last_price);
    if let Some(mark) = ticker.mark_price {
        let _ = write!(text, "\n- Mark price: {}", mark);
    }
    if let Some(rate) = ticker.funding_rate {
        let _ = write!(text, "\n- Funding rate: {:.4}%", rate * 100.0);
    }
    text
}

fn format_instrument(meta: &InstrumentMeta) -> String {
    format!(
        "- Qty step: {} (min {}, max {})\n- Tick size: {} (min price {}, max price {})",
        meta.qty_step,
        meta.min_order_qty,
        opt(meta.max_order_qty),
        meta.tick_size,
        meta.min_price,
        opt(meta.max_price)
    )
}

fn format_indicators(indicators: &[TimeframeIndicators]) -> String {
    if indicators.is_empty() {
        return "n/a".to_string();
    }

    indicators
        .iter()
        .map(|tf| {
            let s = &tf.snapshot;
            let macd = match &s.macd {
                Some(m) => format!(
                    "line {:.4}, signal {:.4}, hist {:.4}",
                    m.line, m.signal, m.histogram
                ),
                None => "n/a".to_string(),
            };
            format!(
                "- {}: VWMA {} | RSI {} | MACD {}",
                tf.timeframe,
                opt_fixed(s.vwma, 2),
                opt_fixed(s.rsi, 1),
                macd
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_candles(candles: &[Candle]) -> String {
    if candles.is_empty() {
        return "n/a".to_string();
    }

    let start = candles.len().saturating_sub(PROMPT_CANDLES);
    candles[start..]
        .iter()
        .map(|c| {
            let time = Utc
                .timestamp_millis_opt(c.start_time)
                .single()
                .map(|t| t.format("%m-%d %H:%M").to_string())
                .unwrap_or_else(|| c.start_time.to_string());
            format!(
                "{} O {} H {} L {} C {} V {:.2}",
                time, c.open, c.high, c.low, c.close, c.volume
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_news(news: &[NewsItem]) -> String {
    if news.is_empty() {
        return "No recent headlines.".to_string();
    }

    news.iter()
        .map(|n| match &n.source {
            Some(source) => format!("- {} ({})", n.title.trim(), source),
            None => format!("- {}", n.title.trim()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
}

fn opt_fixed(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_else(|| "n/a".to_string())
}
