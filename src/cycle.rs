//! One trading cycle: gather state, ask for decisions, guard them, submit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;

use crate::api::{MarketDataSource, NewsItem, NewsSource, NoNews};
use crate::config::AppConfig;
use crate::execution::{build_orders, DecisionOutcome, OrderContext, OrderSubmitter, RejectionLog};
use crate::indicators::{compute_timeframes, normalize_candles, IndicatorSettings};
use crate::llm::{render_context, render_template, DecisionService, PromptContext};
use crate::models::{Candle, Decision, ExecutionResult, InstrumentMeta};
use crate::notify::{format_cycle_digest, notify_quietly, Notifier};
use crate::scheduler::CycleRunner;

/// Static inputs for every cycle
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub symbol: String,
    /// The first timeframe also supplies the raw candles shown in the prompt
    pub timeframes: Vec<String>,
    pub candle_limit: usize,
    pub max_leverage: u32,
    pub indicators: IndicatorSettings,
    pub news_limit: usize,
    pub template: String,
}

impl CycleSettings {
    pub fn from_config(config: &AppConfig, template: String) -> Self {
        Self {
            symbol: config.trading.symbol.trim().to_ascii_uppercase(),
            timeframes: config.trading.timeframes.clone(),
            candle_limit: config.trading.candle_limit,
            max_leverage: config.trading.max_leverage,
            indicators: config.indicators.clone(),
            news_limit: config.news.as_ref().map(|n| n.limit).unwrap_or(0),
            template,
        }
    }
}

/// What happened during one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub decisions: Vec<Decision>,
    pub outcomes: Vec<DecisionOutcome>,
    pub results: Vec<ExecutionResult>,
}

impl CycleReport {
    pub fn rejection_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    pub fn orders_placed(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}

pub struct TradingCycle {
    settings: CycleSettings,
    market: Arc<dyn MarketDataSource>,
    decisions: Arc<dyn DecisionService>,
    submitter: OrderSubmitter,
    notifier: Arc<dyn Notifier>,
    news: Arc<dyn NewsSource>,
}

impl TradingCycle {
    pub fn new(
        settings: CycleSettings,
        market: Arc<dyn MarketDataSource>,
        decisions: Arc<dyn DecisionService>,
        submitter: OrderSubmitter,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            market,
            decisions,
            submitter,
            notifier,
            news: Arc::new(NoNews),
        }
    }

    pub fn with_news(mut self, news: Arc<dyn NewsSource>) -> Self {
        self.news = news;
        self
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Run one full cycle.
    ///
    /// Failure to fetch account, ticker, instrument or position, or an
    /// unusable decision reply, ends the cycle with an error. News and
    /// per-timeframe candles degrade to empty.
    pub async fn run(&self) -> Result<CycleReport> {
        let symbol = self.settings.symbol.as_str();
        tracing::info!("🔄 Starting cycle for {}", symbol);

        let candle_fetches = join_all(self.settings.timeframes.iter().map(|tf| async move {
            let fetched = self
                .market
                .candles(symbol, tf, self.settings.candle_limit)
                .await;
            (tf.clone(), fetched)
        }));

        let (account, ticker, instrument, position, news, candle_results) = tokio::join!(
            self.market.account_snapshot(),
            self.market.ticker(symbol),
            self.market.instrument_meta(symbol),
            self.market.position(symbol),
            self.fetch_news(),
            candle_fetches,
        );

        let account = account.context("Failed to fetch account snapshot")?;
        let ticker = ticker.with_context(|| format!("Failed to fetch ticker for {}", symbol))?;
        let instrument = instrument
            .with_context(|| format!("Failed to fetch instrument info for {}", symbol))?;
        let position = position.with_context(|| format!("Failed to fetch position for {}", symbol))?;

        let series: Vec<(String, Vec<Candle>)> = candle_results
            .into_iter()
            .map(|(tf, fetched)| match fetched {
                Ok(candles) => (tf, candles),
                Err(e) => {
                    tracing::warn!("  ✗ {} candles unavailable for {}: {}", tf, symbol, e);
                    (tf, Vec::new())
                }
            })
            .collect();

        tracing::info!(
            "  ✓ Equity {:.2} | available {:.2} | margin usage {:.1}% | last {}",
            account.total_equity,
            account.available_balance,
            account.margin_usage_ratio() * 100.0,
            ticker.last_price
        );

        let indicators = compute_timeframes(&series, &self.settings.indicators);
        let (candle_timeframe, recent_candles) = match series.first() {
            Some((tf, candles)) => (tf.as_str(), normalize_candles(candles)),
            None => ("n/a", Vec::new()),
        };
        let leverage_ceiling = leverage_ceiling(self.settings.max_leverage, &instrument);

        let prompt = render_template(
            &self.settings.template,
            &render_context(&PromptContext {
                symbol,
                now: Utc::now(),
                account: &account,
                ticker: &ticker,
                instrument: &instrument,
                position: &position,
                indicators: &indicators,
                recent_candles: &recent_candles,
                candle_timeframe,
                news: &news,
                leverage_ceiling,
            }),
        );

        let decisions = self
            .decisions
            .decide(&prompt)
            .await
            .context("Decision request failed")?;

        let ctx = OrderContext {
            symbol,
            account: &account,
            market_price: ticker.last_price,
            instrument: &instrument,
            position: position.position.as_ref(),
            hedge_mode: position.hedge_mode,
            leverage_ceiling,
        };
        let rejections = RejectionLog::new();
        let outcomes = build_orders(&decisions, &ctx, &rejections);

        let orders: Vec<_> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().cloned())
            .collect();
        tracing::info!(
            "  📋 {} decision(s) → {} order(s), {} rejected",
            decisions.len(),
            orders.len(),
            rejections.count()
        );

        let results = self.submitter.execute(orders).await;

        let digest = format_cycle_digest(
            symbol,
            &decisions,
            &outcomes,
            &results,
            self.submitter.is_dry_run(),
        );
        notify_quietly(self.notifier.as_ref(), &digest).await;

        let report = CycleReport {
            decisions,
            outcomes,
            results,
        };
        tracing::info!(
            "✅ Cycle complete: {} order(s) placed, {} rejection(s)",
            report.orders_placed(),
            report.rejection_count()
        );
        Ok(report)
    }

    async fn fetch_news(&self) -> Vec<NewsItem> {
        if self.settings.news_limit == 0 {
            return Vec::new();
        }
        match self
            .news
            .latest(&self.settings.symbol, self.settings.news_limit)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("  ✗ News unavailable: {:#}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl CycleRunner for TradingCycle {
    fn label(&self) -> &str {
        &self.settings.symbol
    }

    async fn run_cycle(&self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}

/// Configured ceiling, narrowed by the instrument's own limit
pub fn leverage_ceiling(configured: u32, instrument: &InstrumentMeta) -> u32 {
    let venue = instrument
        .max_leverage
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| v.floor() as u32);

    venue
        .map_or(configured, |v| configured.min(v))
        .max(1)
}
