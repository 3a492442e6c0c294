//! Guardrail order builder.
//!
//! Turns advisory decisions into exchange-ready limit orders. Each decision is
//! checked on its own; a rejected decision is reported and skipped, never
//! aborting the rest of the batch.

use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use uuid::Uuid;

use super::quantize::{normalize_price, normalize_quantity};
use crate::models::{
    AccountSnapshot, Decision, InstrumentMeta, Operation, OrderInstruction, OrderSide,
    OrderType, Position, PositionSide, TimeInForce, TriggerReference,
};

/// Everything the builder needs to know about the traded symbol this cycle
#[derive(Debug, Clone, Copy)]
pub struct OrderContext<'a> {
    pub symbol: &'a str,
    pub account: &'a AccountSnapshot,
    pub market_price: f64,
    pub instrument: &'a InstrumentMeta,
    pub position: Option<&'a Position>,
    pub hedge_mode: bool,
    pub leverage_ceiling: u32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("decision targets {0}, which is not the traded symbol")]
    SymbolMismatch(String),

    #[error("no open position to close")]
    NoOpenPosition,

    #[error("reference price {price} is not usable")]
    InvalidPrice { price: f64 },

    #[error("price {price} outside instrument range [{min}, {max}]")]
    PriceOutOfRange { price: f64, min: f64, max: f64 },

    #[error("stop-loss and take-profit are both required")]
    MissingProtection,

    #[error(
        "{side:?} entry at {entry} has stop-loss {stop_loss} / take-profit {take_profit} on the wrong side"
    )]
    InconsistentProtection {
        side: OrderSide,
        entry: f64,
        stop_loss: f64,
        take_profit: f64,
    },

    #[error("insufficient margin: need {required:.4}, available {available:.4}")]
    InsufficientMargin { required: f64, available: f64 },

    #[error("quantity {quantity} outside instrument range [{min}, {max}]")]
    QuantityOutOfRange { quantity: f64, min: f64, max: f64 },
}

/// Result of running one decision through the guardrails
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub result: Result<OrderInstruction, Rejection>,
}

/// Receives every rejected decision
pub trait RejectionSink: Send + Sync {
    fn rejected(&self, decision: &Decision, reason: &Rejection);
}

/// Logs rejections and keeps a running count
#[derive(Debug, Default)]
pub struct RejectionLog {
    count: AtomicUsize,
}

impl RejectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl RejectionSink for RejectionLog {
    fn rejected(&self, decision: &Decision, reason: &Rejection) {
        self.count.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            symbol = %decision.symbol,
            operation = ?decision.operation,
            "Decision rejected: {}",
            reason
        );
    }
}

/// Run all decisions through the guardrails.
///
/// Hold and zero-portion decisions are dropped silently; every other decision
/// yields exactly one outcome.
pub fn build_orders(
    decisions: &[Decision],
    ctx: &OrderContext<'_>,
    sink: &dyn RejectionSink,
) -> Vec<DecisionOutcome> {
    decisions
        .iter()
        .filter(|d| is_actionable(d))
        .map(|decision| {
            let result = build_order(decision, ctx);
            if let Err(reason) = &result {
                sink.rejected(decision, reason);
            }
            DecisionOutcome {
                decision: decision.clone(),
                result,
            }
        })
        .collect()
}

/// Buy/sell/close with a positive portion
pub fn is_actionable(decision: &Decision) -> bool {
    decision.operation != Operation::Hold
        && decision.target_portion_of_balance.is_finite()
        && decision.target_portion_of_balance > 0.0
}

/// Validate a single actionable decision and turn it into an order
pub fn build_order(
    decision: &Decision,
    ctx: &OrderContext<'_>,
) -> Result<OrderInstruction, Rejection> {
    if !same_symbol(&decision.symbol, ctx.symbol) {
        return Err(Rejection::SymbolMismatch(decision.symbol.clone()));
    }

    let instrument = ctx.instrument;
    let is_close = decision.operation == Operation::Close;

    let held = if is_close {
        match ctx.position {
            Some(p) if p.size > 0.0 => Some(p),
            _ => return Err(Rejection::NoOpenPosition),
        }
    } else {
        None
    };

    let side = match (decision.operation, held) {
        (Operation::Close, Some(p)) => match p.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        },
        (Operation::Sell, _) => OrderSide::Sell,
        _ => OrderSide::Buy,
    };

    let position_index = ctx.hedge_mode.then(|| match held {
        Some(p) => slot_for_position(p.side),
        None => match side {
            OrderSide::Buy => 1,
            OrderSide::Sell => 2,
        },
    });

    let price = reference_price(decision, side, ctx)?;

    let leverage = match held {
        Some(p) => p.leverage.max(1),
        None => decision.leverage.clamp(1, ctx.leverage_ceiling.max(1)),
    };

    let (stop_loss, take_profit) = if is_close {
        (None, None)
    } else {
        let (sl, tp) = protective_prices(decision, side, price, instrument.tick_size)?;
        (Some(sl), Some(tp))
    };

    let portion = decision.target_portion_of_balance.min(1.0);
    let raw_quantity = match held {
        Some(p) => p.size * portion,
        None => open_quantity(ctx.account, instrument, portion, leverage, price)?,
    };

    let quantity = normalize_quantity(raw_quantity, instrument.qty_step);
    let max_qty = instrument.max_order_qty.unwrap_or(f64::INFINITY);
    if !quantity.is_finite()
        || quantity <= 0.0
        || quantity < instrument.min_order_qty
        || quantity > max_qty
    {
        return Err(Rejection::QuantityOutOfRange {
            quantity,
            min: instrument.min_order_qty,
            max: max_qty,
        });
    }

    Ok(OrderInstruction {
        symbol: ctx.symbol.to_string(),
        side,
        order_type: OrderType::Limit,
        quantity,
        price,
        time_in_force: TimeInForce::GoodTilCancel,
        reduce_only: is_close,
        leverage,
        position_index,
        stop_loss,
        take_profit,
        trigger_reference: TriggerReference::LastPrice,
        client_order_id: new_client_order_id(),
    })
}

/// Submission priority: closes free margin first, then sells, then buys
pub fn execution_rank(order: &OrderInstruction) -> u8 {
    match (order.reduce_only, order.side) {
        (true, _) => 0,
        (false, OrderSide::Sell) => 1,
        (false, OrderSide::Buy) => 2,
    }
}

fn slot_for_position(side: PositionSide) -> u8 {
    match side {
        PositionSide::Long => 1,
        PositionSide::Short => 2,
    }
}

fn same_symbol(a: &str, b: &str) -> bool {
    let clean = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect()
    };
    clean(a) == clean(b)
}

/// Worst acceptable fill: max price for buys, min price for sells
fn reference_price(
    decision: &Decision,
    side: OrderSide,
    ctx: &OrderContext<'_>,
) -> Result<f64, Rejection> {
    let guardrail = match side {
        OrderSide::Buy => decision.max_price,
        OrderSide::Sell => decision.min_price,
    };
    let raw = guardrail
        .filter(|p| p.is_finite() && *p > 0.0)
        .unwrap_or(ctx.market_price);

    let price = normalize_price(raw, ctx.instrument.tick_size);
    if !price.is_finite() || price <= 0.0 {
        return Err(Rejection::InvalidPrice { price });
    }

    let max = ctx.instrument.max_price.unwrap_or(f64::INFINITY);
    if price < ctx.instrument.min_price || price > max {
        return Err(Rejection::PriceOutOfRange {
            price,
            min: ctx.instrument.min_price,
            max,
        });
    }

    Ok(price)
}

fn protective_prices(
    decision: &Decision,
    side: OrderSide,
    entry: f64,
    tick_size: f64,
) -> Result<(f64, f64), Rejection> {
    let usable = |p: Option<f64>| p.filter(|v| v.is_finite() && *v > 0.0);
    let (Some(sl), Some(tp)) = (
        usable(decision.stop_loss_price),
        usable(decision.take_profit_price),
    ) else {
        return Err(Rejection::MissingProtection);
    };

    let stop_loss = normalize_price(sl, tick_size);
    let take_profit = normalize_price(tp, tick_size);
    if stop_loss <= 0.0 || take_profit <= 0.0 {
        return Err(Rejection::MissingProtection);
    }

    let consistent = match side {
        OrderSide::Buy => stop_loss < entry && entry < take_profit,
        OrderSide::Sell => stop_loss > entry && entry > take_profit,
    };
    if !consistent {
        return Err(Rejection::InconsistentProtection {
            side,
            entry,
            stop_loss,
            take_profit,
        });
    }

    Ok((stop_loss, take_profit))
}

/// Size an opening order from the available balance.
///
/// Falls back to the instrument minimum when the requested allocation is too
/// small but the balance still covers the minimum's margin.
fn open_quantity(
    account: &AccountSnapshot,
    instrument: &InstrumentMeta,
    portion: f64,
    leverage: u32,
    price: f64,
) -> Result<f64, Rejection> {
    let available = account.available_balance.max(0.0);
    let leverage = leverage as f64;

    let margin = available * portion;
    let notional = margin * leverage;
    let candidate = notional / price;

    if candidate >= instrument.min_order_qty {
        return Ok(candidate);
    }

    let required = instrument.min_order_qty * price / leverage;
    if available >= required {
        tracing::debug!(
            candidate,
            min_order_qty = instrument.min_order_qty,
            "Allocation below exchange minimum, using minimum order quantity"
        );
        Ok(instrument.min_order_qty)
    } else {
        Err(Rejection::InsufficientMargin {
            required,
            available,
        })
    }
}

fn new_client_order_id() -> String {
    format!("pb-{}", Uuid::new_v4().simple())
}
