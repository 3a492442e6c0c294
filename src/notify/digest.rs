use std::fmt::Write as _;

use crate::execution::DecisionOutcome;
use crate::models::{Decision, ExecutionResult, Operation};

/// Human-readable summary of one cycle
pub fn format_cycle_digest(
    symbol: &str,
    decisions: &[Decision],
    outcomes: &[DecisionOutcome],
    results: &[ExecutionResult],
    dry_run: bool,
) -> String {
    let mut out = String::new();
    let mode = if dry_run { " [DRY RUN]" } else { "" };
    let _ = writeln!(out, "📊 {} cycle{}", symbol, mode);

    if decisions.is_empty() {
        let _ = writeln!(out, "No decisions returned.");
    }

    for d in decisions {
        let _ = write!(out, "\n• {}", operation_label(d.operation));
        if d.operation != Operation::Hold {
            let _ = write!(
                out,
                " {:.0}% @ {}x",
                d.target_portion_of_balance * 100.0,
                d.leverage
            );
        }
        if !d.strategy.is_empty() {
            let _ = write!(out, " [{}]", d.strategy);
        }
        if !d.reason.is_empty() {
            let _ = write!(out, "\n  {}", d.reason);
        }
    }

    let rejections: Vec<_> = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().err().map(|r| (o.decision.operation, r)))
        .collect();
    if !rejections.is_empty() {
        let _ = write!(out, "\n\n⛔ Rejected:");
        for (op, reason) in rejections {
            let _ = write!(out, "\n- {}: {}", operation_label(op), reason);
        }
    }

    if !results.is_empty() {
        let _ = write!(out, "\n\n🧾 Orders:");
        for r in results {
            let o = &r.order;
            let kind = if o.reduce_only { " (close)" } else { "" };
            let _ = write!(
                out,
                "\n{} {} {} @ {}{}",
                if r.is_success() { "✅" } else { "❌" },
                o.side.as_str(),
                o.quantity,
                o.price,
                kind
            );
            if let (Some(sl), Some(tp)) = (o.stop_loss, o.take_profit) {
                let _ = write!(out, " SL {} TP {}", sl, tp);
            }
            match (&r.order_id, &r.error) {
                (Some(id), _) => {
                    let _ = write!(out, " #{}", id);
                }
                (None, Some(err)) => {
                    let _ = write!(out, "\n  {}", err);
                }
                (None, None) => {}
            }
        }
    }

    out.trim_end().to_string()
}

/// Alert text for a cycle that ended early
pub fn format_failure(symbol: &str, error: &anyhow::Error) -> String {
    format!("⚠️ {} cycle failed: {:#}", symbol, error)
}

fn operation_label(op: Operation) -> &'static str {
    match op {
        Operation::Buy => "BUY",
        Operation::Sell => "SELL",
        Operation::Hold => "HOLD",
        Operation::Close => "CLOSE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Rejection;
    use crate::models::{OrderInstruction, OrderSide, OrderType, TimeInForce, TriggerReference};

    fn decision(operation: Operation, reason: &str) -> Decision {
        Decision {
            operation,
            symbol: "BTCUSDT".to_string(),
            target_portion_of_balance: 0.25,
            leverage: 3,
            max_price: None,
            min_price: None,
            stop_loss_price: None,
            take_profit_price: None,
            reason: reason.to_string(),
            strategy: "trend".to_string(),
        }
    }

    #[test]
    fn test_digest_lists_decisions_rejections_and_orders() {
        let buy = decision(Operation::Buy, "breakout above range");
        let sell = decision(Operation::Sell, "fade");
        let hold = decision(Operation::Hold, "");

        let order = OrderInstruction {
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: 0.12,
            price: 50000.0,
            time_in_force: TimeInForce::GoodTilCancel,
            reduce_only: false,
            leverage: 3,
            position_index: None,
            stop_loss: Some(48000.0),
            take_profit: Some(55000.0),
            trigger_reference: TriggerReference::LastPrice,
            client_order_id: "pb-1".to_string(),
        };

        let outcomes = vec![
            DecisionOutcome {
                decision: buy.clone(),
                result: Ok(order.clone()),
            },
            DecisionOutcome {
                decision: sell.clone(),
                result: Err(Rejection::MissingProtection),
            },
        ];
        let results = vec![ExecutionResult {
            order,
            order_id: Some("abc123".to_string()),
            error: None,
        }];

        let text = format_cycle_digest("BTCUSDT", &[buy, sell, hold], &outcomes, &results, false);

        assert!(text.starts_with("📊 BTCUSDT cycle"));
        assert!(text.contains("• BUY 25% @ 3x [trend]\n  breakout above range"));
        assert!(text.contains("• HOLD [trend]"));
        assert!(text.contains("⛔ Rejected:\n- SELL:"));
        assert!(text.contains("✅ Buy 0.12 @ 50000 SL 48000 TP 55000 #abc123"));
        assert!(!text.contains("DRY RUN"));
    }

    #[test]
    fn test_digest_without_decisions() {
        let text = format_cycle_digest("ETHUSDT", &[], &[], &[], true);
        assert_eq!(text, "📊 ETHUSDT cycle [DRY RUN]\nNo decisions returned.");
    }

    #[test]
    fn test_failure_includes_context_chain() {
        let err = anyhow::anyhow!("HTTP 502").context("Failed to fetch account snapshot");
        let text = format_failure("BTCUSDT", &err);
        assert_eq!(
            text,
            "⚠️ BTCUSDT cycle failed: Failed to fetch account snapshot: HTTP 502"
        );
    }
}
