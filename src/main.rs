use anyhow::Context;
use clap::Parser;
use perpbot::api::{BybitClient, HttpNewsSource, MarketDataSource, NewsSource, NoNews, OrderGateway};
use perpbot::config::AppConfig;
use perpbot::cycle::{CycleSettings, TradingCycle};
use perpbot::execution::{LeverageCache, OrderSubmitter};
use perpbot::llm::LlmDecisionClient;
use perpbot::notify::{LogNotifier, Notifier, TelegramNotifier};
use perpbot::scheduler::CycleScheduler;
use perpbot::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// LLM-driven perpetual futures trading bot
#[derive(Debug, Parser)]
#[command(name = "perpbot", version, about)]
struct Args {
    /// Path to a TOML config file (default: config/perpbot.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Log orders instead of sending them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if args.dry_run {
        config.trading.dry_run = true;
    }
    config.validate()?;

    tracing::info!(
        "🚀 PerpBot starting - {} on Bybit {}{}",
        config.trading.symbol,
        config.exchange.category,
        if config.trading.dry_run { " (dry run)" } else { "" }
    );

    let template = config.prompt_template()?;
    let settings = CycleSettings::from_config(&config, template);

    let exchange = Arc::new(BybitClient::new(config.exchange.clone())?);
    let market: Arc<dyn MarketDataSource> = exchange.clone();
    let gateway: Arc<dyn OrderGateway> = exchange;

    let decisions = Arc::new(LlmDecisionClient::new(
        config.llm.clone(),
        settings.symbol.clone(),
    )?);

    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(telegram) => {
            tracing::info!("  📨 Telegram notifications enabled");
            Arc::new(TelegramNotifier::new(telegram.clone())?)
        }
        None => Arc::new(LogNotifier),
    };

    let news: Arc<dyn NewsSource> = match &config.news {
        Some(news) => Arc::new(HttpNewsSource::new(news.url.clone())?),
        None => Arc::new(NoNews),
    };

    let submitter = OrderSubmitter::new(gateway, Arc::new(LeverageCache::new()))
        .with_dry_run(config.trading.dry_run);

    let cycle = Arc::new(
        TradingCycle::new(settings, market, decisions, submitter, notifier.clone())
            .with_news(news),
    );

    if args.once {
        cycle.run().await.context("Cycle failed")?;
        tracing::info!("👋 PerpBot stopped");
        return Ok(());
    }

    let scheduler = Arc::new(CycleScheduler::new(
        cycle,
        notifier,
        Duration::from_secs(config.trading.interval_secs),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    tracing::info!("\nPress Ctrl+C to stop...\n");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");

    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task exited abnormally: {}", e);
    }

    tracing::info!("👋 PerpBot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("perpbot=info")),
        )
        .init();
}
