use crate::data::Clock;
use crate::exchange::{CandleFeed, FeedRequest};
use crate::models::{Candle, TimeFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub max_window_candles: u32,
    pub backfill_candles: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_window_candles: 25_000,
            backfill_candles: 5_000,
        }
    }
}

pub struct SyncWorker {
    handle: Option<JoinHandle<()>>,
    stop_tx: Sender<()>,
    cancel: Arc<AtomicBool>,
}

impl SyncWorker {
    pub fn spawn(
        feed: Arc<dyn CandleFeed>,
        clock: Arc<dyn Clock>,
        outbox: Sender<Vec<Candle>>,
        symbol: String,
        timeframe: TimeFrame,
        begin: i64,
        config: WorkerConfig,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let (stop_tx, stop_rx) = channel();
        let handle = std::thread::spawn(move || {
            run_loop(
                feed,
                clock,
                outbox,
                stop_rx,
                worker_cancel,
                symbol,
                timeframe,
                begin,
                config,
            );
        });
        Self {
            handle: Some(handle),
            stop_tx,
            cancel,
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(
    feed: Arc<dyn CandleFeed>,
    clock: Arc<dyn Clock>,
    outbox: Sender<Vec<Candle>>,
    stop_rx: Receiver<()>,
    cancel: Arc<AtomicBool>,
    symbol: String,
    timeframe: TimeFrame,
    mut begin: i64,
    config: WorkerConfig,
) {
    let period = timeframe.period_secs();
    let max_span = period.saturating_mul(config.max_window_candles.max(1) as i64);
    let mut window_span = max_span;

    debug!(symbol = %symbol, timeframe = timeframe.as_str(), begin, "sync worker started");

    loop {
        match stop_rx.recv_timeout(config.poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let now = clock.now();
        let end = (begin.saturating_add(window_span)).min(now);
        if end <= begin {
            continue;
        }

        let request = FeedRequest {
            symbol: symbol.clone(),
            timeframe,
            start_time: begin,
            end_time: end,
        };
        match feed.fetch_candles(&request, &cancel) {
            Err(err) => {
                window_span = (window_span / 2).max(period);
                warn!(
                    symbol = %symbol,
                    error = %err.message,
                    window_secs = window_span,
                    "candle fetch failed, shrinking window"
                );
            }
            Ok(batch) if batch.is_empty() => {
                begin = end;
                window_span = max_span;
            }
            Ok(batch) => {
                begin = batch.last().map(|candle| candle.time).unwrap_or(end);
                window_span = max_span;
                if outbox.send(batch).is_err() {
                    break;
                }
            }
        }
    }

    debug!(symbol = %symbol, "sync worker stopped");
}
