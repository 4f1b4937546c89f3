use anyhow::{Context, Result};
use candlebot::api::{Credentials, DeltaOrderClient, HistoryClient};
use candlebot::backfill::backfill;
use candlebot::execution::{pump_lines, FeedDecoder, Gateway, PaperGateway, Runner, StrategyEngine};
use candlebot::persistence::{Store, TradeStats, TradeRecorder, TradeStore};
use candlebot::AppConfig;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const FEED_CAPACITY: usize = 4096;

#[derive(Parser)]
#[command(name = "candlebot", about = "Candle-based trend and volume-delta trading bot")]
struct Cli {
    /// TOML config file layered over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream JSON trade messages through one engine per interval.
    Run {
        /// Feed file, or "-" for stdin.
        #[arg(long, default_value = "-")]
        input: String,

        /// Candle interval (repeatable). Defaults to market.interval.
        #[arg(long = "interval")]
        intervals: Vec<String>,

        /// Start from an empty series instead of fetching history.
        #[arg(long, default_value_t = false)]
        no_history: bool,
    },
    /// Fetch and resample history, printing the candles.
    Backfill {
        /// Candle interval. Defaults to market.interval.
        #[arg(long)]
        interval: Option<String>,
    },
    /// Show stored trades and totals.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run {
            input,
            intervals,
            no_history,
        } => run(config, &input, intervals, no_history).await,
        Commands::Backfill { interval } => print_backfill(config, interval).await,
        Commands::Stats => print_stats(config).await,
    }
}

async fn run(config: AppConfig, input: &str, intervals: Vec<String>, no_history: bool) -> Result<()> {
    let intervals = if intervals.is_empty() {
        vec![config.market.interval.clone()]
    } else {
        intervals
    };

    let gateway = Arc::new(build_gateway(&config)?);
    let store = Store::open(&config.storage).await.context("opening trade store")?;
    let recorder = Arc::new(TradeRecorder::new(store).await.context("reading trade log")?);
    let history = HistoryClient::new(&config.market.history_base_url)?;

    tracing::info!(
        "candlebot starting: {} {:?}, {} orders",
        config.market.symbol,
        intervals,
        if config.orders.paper { "paper" } else { "live" }
    );

    let (tx, _) = broadcast::channel(FEED_CAPACITY);
    let mut handles = Vec::new();

    for interval in &intervals {
        let instance = config
            .with_interval(interval)
            .with_context(|| format!("interval {}", interval))?;
        let mut engine = StrategyEngine::new(&instance)?;

        if !no_history {
            match backfill(&history, &instance, Utc::now()).await {
                Ok((candles, _)) => {
                    engine.seed_history(candles);
                }
                Err(e) => tracing::warn!("[{}] History unavailable, starting cold: {}", engine.label(), e),
            }
        }

        let runner = Runner::new(engine, Arc::clone(&gateway), Arc::clone(&recorder), &instance.orders);
        handles.push(tokio::spawn(runner.run(tx.subscribe())));
    }

    let decoder = FeedDecoder::new(&config.market.symbol, config.market.snapshot_tail);
    let reader = open_input(input).await?;

    tokio::select! {
        result = pump_lines(reader, &decoder, &tx) => {
            result.context("reading feed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
    }
    drop(tx);

    for handle in handles {
        let summary = handle.await.context("runner task")?;
        if let Some(position) = summary.open_position {
            tracing::warn!(
                "Left open: {} @ {} (stop {})",
                position.direction,
                position.entry_price,
                position.stop_loss
            );
        }
    }

    let stats = recorder.stats().await?;
    tracing::info!(
        "Done: {} trades, win rate {}%, total pnl {}",
        stats.total_trades,
        stats.win_rate,
        stats.total_pnl
    );
    Ok(())
}

fn build_gateway(config: &AppConfig) -> Result<Gateway> {
    if config.orders.paper {
        return Ok(Gateway::Paper(PaperGateway::new()));
    }
    let credentials = Credentials::from_env().context("live orders need API credentials")?;
    let client = DeltaOrderClient::new(&config.orders.base_url, credentials, config.market.product_id)?;
    Ok(Gateway::Live(client))
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening feed {}", input))?;
    Ok(Box::new(BufReader::new(file)))
}

async fn print_backfill(config: AppConfig, interval: Option<String>) -> Result<()> {
    let config = match interval {
        Some(interval) => config.with_interval(&interval)?,
        None => config,
    };
    let client = HistoryClient::new(&config.market.history_base_url)?;
    let (candles, stats) = backfill(&client, &config, Utc::now()).await?;

    for candle in &candles {
        println!(
            "{}  O:{}  H:{}  L:{}  C:{}  V:{}",
            candle.bucket_start().format("%Y-%m-%d %H:%M"),
            candle.open(),
            candle.high(),
            candle.low(),
            candle.close(),
            candle.volume()
        );
    }
    println!(
        "{} candles ({} rows fetched, {} rejected)",
        candles.len(),
        stats.fetched_rows,
        stats.validation_failures
    );
    Ok(())
}

async fn print_stats(config: AppConfig) -> Result<()> {
    let store = Store::open(&config.storage).await.context("opening trade store")?;
    let records = store.list().await?;

    for r in &records {
        println!(
            "#{:<4} {:<20} {:<5} {} -> {}  pnl {} ({}R)  {}",
            r.trade_id, r.strategy, r.direction, r.entry_price, r.exit_price, r.pnl, r.r_multiple, r.exit_reason
        );
    }

    let stats = TradeStats::from_records(&records);
    println!("Total trades:  {}", stats.total_trades);
    println!("Wins/Losses:   {}/{}", stats.wins, stats.losses);
    println!("Win rate:      {}%", stats.win_rate);
    println!("Total P&L:     {}", stats.total_pnl);
    println!("Avg win/loss:  {} / {}", stats.avg_win, stats.avg_loss);
    println!("Profit factor: {}", stats.profit_factor);
    println!("Expectancy:    {}", stats.expectancy);
    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("candlebot=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
