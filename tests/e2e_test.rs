use async_trait::async_trait;
use perpbot::api::{
    ExchangeError, LeverageSetter, MarketDataSource, NewsItem, NewsSource, OrderGateway,
};
use perpbot::cycle::{CycleSettings, TradingCycle};
use perpbot::execution::{LeverageCache, OrderSubmitter};
use perpbot::indicators::IndicatorSettings;
use perpbot::llm::{parse_decisions, DecisionError, DecisionService, DEFAULT_TEMPLATE};
use perpbot::notify::Notifier;
use perpbot::scheduler::{CycleScheduler, TickOutcome};
use perpbot::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// In-memory collaborators
// ============================================================================

#[derive(Default)]
struct FakeMarket {
    fail_ticker: bool,
    fail_timeframe: Option<&'static str>,
    position: Option<Position>,
    candle_calls: AtomicUsize,
}

fn candles(count: usize) -> Vec<Candle> {
    // Newest first, the way the venue returns them
    (0..count)
        .rev()
        .map(|i| {
            let close = 50000.0 + (i as f64 * 0.7).sin() * 250.0 + i as f64 * 5.0;
            Candle {
                start_time: 1_700_000_000_000 + i as i64 * 300_000,
                open: close - 10.0,
                high: close + 40.0,
                low: close - 40.0,
                close,
                volume: 10.0 + (i % 7) as f64,
            }
        })
        .collect()
}

#[async_trait]
impl MarketDataSource for FakeMarket {
    async fn account_snapshot(&self) -> std::result::Result<AccountSnapshot, ExchangeError> {
        Ok(AccountSnapshot {
            total_equity: 12000.0,
            available_balance: 10000.0,
            used_margin: 2000.0,
            maintenance_margin: 100.0,
        })
    }

    async fn ticker(&self, symbol: &str) -> std::result::Result<Ticker, ExchangeError> {
        if self.fail_ticker {
            return Err(ExchangeError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: 50000.0,
            mark_price: Some(50001.0),
            funding_rate: Some(0.0001),
        })
    }

    async fn instrument_meta(
        &self,
        symbol: &str,
    ) -> std::result::Result<InstrumentMeta, ExchangeError> {
        Ok(InstrumentMeta {
            symbol: symbol.to_string(),
            min_order_qty: 0.001,
            max_order_qty: Some(100.0),
            qty_step: 0.001,
            tick_size: 0.1,
            min_price: 0.1,
            max_price: Some(1_000_000.0),
            max_leverage: Some(100.0),
        })
    }

    async fn position(&self, _symbol: &str) -> std::result::Result<PositionState, ExchangeError> {
        Ok(PositionState {
            position: self.position.clone(),
            hedge_mode: false,
        })
    }

    async fn candles(
        &self,
        _symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> std::result::Result<Vec<Candle>, ExchangeError> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_timeframe == Some(timeframe) {
            return Err(ExchangeError::Decode("kline unavailable".to_string()));
        }
        Ok(candles(limit.min(60)))
    }
}

struct ScriptedDecisions {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedDecisions {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl DecisionService for ScriptedDecisions {
    async fn decide(&self, context: &str) -> std::result::Result<Vec<Decision>, DecisionError> {
        self.prompts.lock().unwrap().push(context.to_string());
        parse_decisions(&self.reply, "BTCUSDT")
    }
}

#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl LeverageSetter for RecordingGateway {
    fn category(&self) -> &str {
        "linear"
    }

    async fn set_leverage(
        &self,
        symbol: &str,
        leverage: u32,
    ) -> std::result::Result<(), ExchangeError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("leverage {} {}", symbol, leverage));
        Ok(())
    }
}

#[async_trait]
impl OrderGateway for RecordingGateway {
    async fn place_order(
        &self,
        order: &OrderInstruction,
    ) -> std::result::Result<String, ExchangeError> {
        self.calls.lock().unwrap().push(format!(
            "order {} {} @ {}",
            order.side.as_str(),
            order.quantity,
            order.price
        ));
        Ok("venue-1".to_string())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

struct BrokenNews;

#[async_trait]
impl NewsSource for BrokenNews {
    async fn latest(&self, _symbol: &str, _limit: usize) -> anyhow::Result<Vec<NewsItem>> {
        anyhow::bail!("feed down")
    }
}

fn settings(news_limit: usize) -> CycleSettings {
    CycleSettings {
        symbol: "BTCUSDT".to_string(),
        timeframes: vec!["5m".to_string(), "1h".to_string(), "4h".to_string()],
        candle_limit: 200,
        max_leverage: 20,
        indicators: IndicatorSettings::default(),
        news_limit,
        template: DEFAULT_TEMPLATE.to_string(),
    }
}

struct Harness {
    market: Arc<FakeMarket>,
    decisions: Arc<ScriptedDecisions>,
    gateway: Arc<RecordingGateway>,
    notifier: Arc<RecordingNotifier>,
    cycle: TradingCycle,
}

fn harness(market: FakeMarket, reply: &str, news_limit: usize) -> Harness {
    let market = Arc::new(market);
    let decisions = Arc::new(ScriptedDecisions::new(reply));
    let gateway = Arc::new(RecordingGateway::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let submitter = OrderSubmitter::new(gateway.clone(), Arc::new(LeverageCache::new()));
    let cycle = TradingCycle::new(
        settings(news_limit),
        market.clone(),
        decisions.clone(),
        submitter,
        notifier.clone(),
    )
    .with_news(Arc::new(BrokenNews));

    Harness {
        market,
        decisions,
        gateway,
        notifier,
        cycle,
    }
}

const MIXED_REPLY: &str = r#"```json
{"decisions": [
  {"operation": "buy", "symbol": "BTCUSDT", "target_portion_of_balance": 0.2, "leverage": 3,
   "max_price": 50000, "stop_loss_price": 48000, "take_profit_price": 55000,
   "reason": "trend continuation", "strategy": "momentum"},
  {"operation": "sell", "symbol": "BTCUSDT", "target_portion_of_balance": 0.1, "leverage": 2,
   "min_price": 50000, "reason": "no stops given", "strategy": "fade"},
  {"operation": "hold", "symbol": "BTCUSDT", "target_portion_of_balance": 0, "leverage": 1,
   "reason": "wait", "strategy": "none"}
]}
```"#;

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_cycle_builds_and_submits_orders() {
    let _ = tracing_subscriber::fmt::try_init();

    println!("=== Full cycle with in-memory venue ===\n");
    let h = harness(FakeMarket::default(), MIXED_REPLY, 0);

    let report = tokio_test::assert_ok!(h.cycle.run().await);

    println!("1. Decisions and guardrails");
    assert_eq!(report.decisions.len(), 3);
    // Hold is dropped before the guardrails
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.rejection_count(), 1);
    println!("   ✓ 3 decisions, 1 rejected, hold ignored");

    println!("2. Submission");
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.orders_placed(), 1);
    let placed = &report.results[0].order;
    assert_eq!(placed.side, OrderSide::Buy);
    assert!((placed.quantity - 0.12).abs() < 1e-9);
    assert_eq!(placed.leverage, 3);
    assert_eq!(placed.stop_loss, Some(48000.0));
    assert_eq!(placed.take_profit, Some(55000.0));
    assert!(!placed.reduce_only);

    let calls = h.gateway.calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["leverage BTCUSDT 3", "order Buy 0.12 @ 50000"]);
    println!("   ✓ {:?}", calls);

    println!("3. Prompt and digest");
    let prompts = h.decisions.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("BTCUSDT"));
    assert!(prompts[0].contains("- 5m: VWMA"));
    assert!(prompts[0].contains("Flat"));
    assert!(!prompts[0].contains("{{"));

    let messages = h.notifier.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("✅ Buy 0.12 @ 50000"));
    assert!(messages[0].contains("⛔ Rejected"));
    println!("   ✓ Digest sent\n\n=== Done ===");
}

#[tokio::test]
async fn test_auxiliary_failures_degrade() {
    let market = FakeMarket {
        fail_timeframe: Some("4h"),
        ..Default::default()
    };
    // News enabled but the feed fails
    let h = harness(market, MIXED_REPLY, 5);

    // Auxiliary failures must not end the cycle
    let report = tokio_test::assert_ok!(h.cycle.run().await);

    assert_eq!(h.market.candle_calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.orders_placed(), 1);

    let prompt = h.decisions.prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("- 4h: VWMA n/a | RSI n/a | MACD n/a"));
    assert!(prompt.contains("No recent headlines."));
}

#[tokio::test]
async fn test_mandatory_failure_ends_cycle() {
    let market = FakeMarket {
        fail_ticker: true,
        ..Default::default()
    };
    let h = harness(market, MIXED_REPLY, 0);

    let err = tokio_test::assert_err!(h.cycle.run().await);

    assert!(format!("{:#}", err).contains("ticker"));
    assert_eq!(h.decisions.calls(), 0);
    assert!(h.gateway.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unparseable_reply_ends_cycle() {
    let h = harness(FakeMarket::default(), "Sure! I'd go long here.", 0);

    let err = h.cycle.run().await.unwrap_err();

    assert!(format!("{:#}", err).contains("Decision request failed"));
    assert!(h.gateway.calls.lock().unwrap().is_empty());
    assert!(h.notifier.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_close_uses_position_leverage_without_sync() {
    let market = FakeMarket {
        position: Some(Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Short,
            size: 0.5,
            entry_price: 51000.0,
            leverage: 7,
            unrealized_pnl: 500.0,
            liq_price: Some(58000.0),
            take_profit: None,
            stop_loss: None,
            position_index: 0,
        }),
        ..Default::default()
    };
    let reply = r#"[{"operation":"close","symbol":"BTCUSDT","target_portion_of_balance":0.5,
                     "leverage":3,"max_price":50100,"reason":"take profit","strategy":"exit"}]"#;
    let h = harness(market, reply, 0);

    let report = h.cycle.run().await.unwrap();

    assert_eq!(report.orders_placed(), 1);
    let order = &report.results[0].order;
    assert_eq!(order.side, OrderSide::Buy);
    assert!(order.reduce_only);
    assert_eq!(order.leverage, 7);
    assert!((order.quantity - 0.25).abs() < 1e-9);
    // Reduce-only orders skip the leverage call
    assert_eq!(
        h.gateway.calls.lock().unwrap().clone(),
        vec!["order Buy 0.25 @ 50100"]
    );
}

#[tokio::test]
async fn test_scheduler_reports_cycle_failures() {
    let market = FakeMarket {
        fail_ticker: true,
        ..Default::default()
    };
    let h = harness(market, MIXED_REPLY, 0);
    let notifier = h.notifier.clone();

    let scheduler = CycleScheduler::new(Arc::new(h.cycle), notifier.clone(), Duration::from_secs(60));

    assert_eq!(scheduler.tick().await, TickOutcome::Failed);
    // Still schedulable after a failure
    assert_eq!(scheduler.tick().await, TickOutcome::Failed);

    let messages = notifier.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("⚠️ BTCUSDT cycle failed"));
}
