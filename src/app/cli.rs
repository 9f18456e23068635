use crate::config::Config;
use crate::data::csv::{load_candles_from_csv, parse_time};
use crate::data::{Clock, WallClock};
use crate::exchange::rest::{RestCandleFeed, RestFeedConfig};
use crate::exchange::{CandleFeed, FeedRequest};
use crate::models::{DataEvent, TimeFrame};
use crate::series::registry::{SeriesProvider, SeriesRegistry};
use crate::series::worker::WorkerConfig;
use crate::storage::postgres::PostgresCandleStore;
use crate::storage::CandleStore;
use crate::{Error, Result};
use std::env;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let cli = parse_args(&args)?;

    if cli.show_help {
        print_usage();
        return Ok(());
    }

    let mut config = Config::load(&cli.config_path)?;
    if let Some(symbol) = cli.symbol_override {
        config.symbol = symbol;
    }
    if let Some(timeframe) = cli.timeframe_override {
        config.data.timeframe = timeframe;
    }
    if let Some(mode) = cli.mode_override {
        config.mode = mode;
    }
    config.validate()?;

    match config.mode.as_str() {
        "sync" => run_sync(&config),
        "backfill" => run_backfill(&config),
        "import" => run_import(&config),
        _ => Err(Error::new("unknown mode")),
    }
}

struct CliArgs {
    config_path: String,
    symbol_override: Option<String>,
    timeframe_override: Option<String>,
    mode_override: Option<String>,
    show_help: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut config_path = "config.toml".to_string();
    let mut symbol_override = None;
    let mut timeframe_override = None;
    let mut mode_override = None;
    let mut show_help = false;

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--help" | "-h" => {
                show_help = true;
                index += 1;
            }
            "--config" | "-c" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| Error::new("missing value for --config"))?;
                config_path = value.to_string();
                index += 2;
            }
            "--symbol" | "-s" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| Error::new("missing value for --symbol"))?;
                symbol_override = Some(value.to_string());
                index += 2;
            }
            "--timeframe" | "-t" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| Error::new("missing value for --timeframe"))?;
                timeframe_override = Some(value.to_string());
                index += 2;
            }
            "--mode" | "-m" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| Error::new("missing value for --mode"))?;
                mode_override = Some(value.to_string());
                index += 2;
            }
            unknown => {
                return Err(Error::new(format!("unknown argument: {unknown}")));
            }
        }
    }

    Ok(CliArgs {
        config_path,
        symbol_override,
        timeframe_override,
        mode_override,
        show_help,
    })
}

fn print_usage() {
    println!("usage: tidemark [--config <path>] [--symbol <SYMBOL>] [--timeframe <tf>] [--mode <mode>]");
    println!("  -c, --config      Path to config.toml (default: config.toml)");
    println!("  -s, --symbol      Override symbol from config");
    println!("  -t, --timeframe   Override time frame (1m..1w)");
    println!("  -m, --mode        Override mode (sync|backfill|import)");
    println!("  -h, --help        Show this help");
}

struct LiveSeriesProvider {
    config: Config,
    feed: Arc<dyn CandleFeed>,
    clock: Arc<dyn Clock>,
}

impl SeriesProvider for LiveSeriesProvider {
    fn make_store(&self, symbol: &str, timeframe: TimeFrame) -> Result<Box<dyn CandleStore>> {
        let mut store =
            PostgresCandleStore::connect(&self.config.storage.postgres_dsn, symbol, timeframe)?;
        if pg_init_schema() {
            store.ensure_schema()?;
        }
        Ok(Box::new(store))
    }

    fn feed(&self) -> Option<Arc<dyn CandleFeed>> {
        Some(Arc::clone(&self.feed))
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn worker_config(&self) -> WorkerConfig {
        self.config.worker_config()
    }
}

fn pg_init_schema() -> bool {
    match env::var("TIDEMARK_PG_INIT_SCHEMA") {
        Ok(value) => !matches!(value.to_lowercase().as_str(), "0" | "false" | "no"),
        Err(_) => true,
    }
}

fn run_secs_limit() -> Option<u64> {
    env::var("TIDEMARK_SYNC_RUN_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn run_sync(config: &Config) -> Result<()> {
    let timeframe = config.timeframe()?;
    let feed = Arc::new(build_feed(config)?);
    let provider = LiveSeriesProvider {
        config: config.clone(),
        feed,
        clock: Arc::new(WallClock),
    };
    let mut registry = SeriesRegistry::new(Box::new(provider));
    let handle = registry.acquire(&config.symbol, timeframe)?;
    let subscription = handle.series().borrow_mut().subscribe();

    info!(symbol = %config.symbol, timeframe = timeframe.as_str(), "sync running");

    let limit = run_secs_limit();
    let started = Instant::now();
    loop {
        sleep(Duration::from_secs(1));
        let applied = handle.series().borrow_mut().pump_sync()?;
        while let Ok(event) = subscription.events.try_recv() {
            match event {
                DataEvent::SyncingChanged { syncing } => {
                    info!(syncing, "data syncing state changed");
                }
                DataEvent::Changed(change) => {
                    debug!(
                        kind = ?change.kind,
                        begin = change.range.begin,
                        end = change.range.end,
                        "data changed"
                    );
                }
            }
        }
        if applied > 0 {
            info!(applied, "candles applied");
        }
        if let Some(secs) = limit {
            if started.elapsed() >= Duration::from_secs(secs) {
                break;
            }
        }
    }

    Ok(())
}

fn run_backfill(config: &Config) -> Result<()> {
    let timeframe = config.timeframe()?;
    let period = timeframe.period_secs();
    let start = parse_time(
        config
            .backfill
            .start_time
            .as_deref()
            .ok_or_else(|| Error::new("backfill.start_time must be set"))?,
    )?;
    let end = parse_time(
        config
            .backfill
            .end_time
            .as_deref()
            .ok_or_else(|| Error::new("backfill.end_time must be set"))?,
    )?;
    if start > end {
        return Err(Error::new("backfill.start_time must be <= end_time"));
    }

    let feed = build_feed(config)?;
    let mut store =
        PostgresCandleStore::connect(&config.storage.postgres_dsn, &config.symbol, timeframe)?;
    if pg_init_schema() {
        store.ensure_schema()?;
    }

    let cancel = AtomicBool::new(false);
    let span = period.saturating_mul(config.sync.max_window_candles.max(1) as i64);
    let mut cursor = start;
    let mut total = 0usize;

    while cursor < end {
        let window_end = (cursor.saturating_add(span)).min(end);
        let request = FeedRequest {
            symbol: config.symbol.clone(),
            timeframe,
            start_time: cursor,
            end_time: window_end,
        };
        let batch = feed.fetch_candles(&request, &cancel)?;
        if batch.is_empty() {
            cursor = window_end;
            continue;
        }
        let last_time = batch.last().map(|candle| candle.time).unwrap_or(window_end);
        total += batch.len();
        store.upsert_many(&batch)?;
        info!(candles = batch.len(), cursor = last_time, "backfill window stored");
        cursor = if last_time >= window_end {
            window_end
        } else {
            last_time + period
        };
    }

    println!("backfill_candles_stored: {total}");
    Ok(())
}

fn run_import(config: &Config) -> Result<()> {
    let timeframe = config.timeframe()?;
    let path = config
        .data
        .csv_path
        .as_deref()
        .ok_or_else(|| Error::new("data.csv_path must be set"))?;
    let candles = load_candles_from_csv(path)?;

    let mut store =
        PostgresCandleStore::connect(&config.storage.postgres_dsn, &config.symbol, timeframe)?;
    if pg_init_schema() {
        store.ensure_schema()?;
    }
    store.upsert_many(&candles)?;

    println!("imported_candles: {}", candles.len());
    Ok(())
}

fn build_feed(config: &Config) -> Result<RestCandleFeed> {
    let mut feed_config = RestFeedConfig::default();
    if let Some(url) = &config.data.feed_base_url {
        feed_config.base_url = url.clone();
    }
    if let Some(limit) = config.data.feed_page_limit {
        feed_config.page_limit = limit;
    }
    RestCandleFeed::new(feed_config)
}
