use crate::data::Clock;
use crate::exchange::CandleFeed;
use crate::models::{Candle, DataChanged, DataEvent, IndexRange, Memo, TimeFrame, UpdateKind};
use crate::series::worker::{SyncWorker, WorkerConfig};
use crate::storage::CandleStore;
use crate::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use tracing::debug;

pub type SharedPriceData = Rc<RefCell<PriceData>>;

pub struct EventSubscription {
    pub id: u64,
    pub events: Receiver<DataEvent>,
}

// Dropping the token releases the reference it represents; the worker stops
// on the 1 -> 0 transition.
pub struct UsageToken {
    shared: SharedPriceData,
}

impl Drop for UsageToken {
    fn drop(&mut self) {
        self.shared.borrow_mut().release();
    }
}

pub struct PriceData {
    symbol: String,
    timeframe: TimeFrame,
    store: Box<dyn CandleStore>,
    feed: Option<Arc<dyn CandleFeed>>,
    clock: Arc<dyn Clock>,
    worker_config: WorkerConfig,
    worker: Option<SyncWorker>,
    inbox: Option<Receiver<Vec<Candle>>>,
    subscribers: Vec<(u64, Sender<DataEvent>)>,
    next_subscriber: u64,
    use_count: usize,
    memo_count: Memo<usize>,
    memo_newest: Memo<Option<Candle>>,
    memo_oldest: Memo<Option<Candle>>,
    memo_current: Memo<Option<Candle>>,
    last_syncing: Option<bool>,
}

impl PriceData {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: TimeFrame,
        store: Box<dyn CandleStore>,
        feed: Option<Arc<dyn CandleFeed>>,
        clock: Arc<dyn Clock>,
        worker_config: WorkerConfig,
    ) -> Result<Self> {
        if timeframe.is_none() {
            return Err(Error::new("price data requires a concrete time frame"));
        }
        Ok(Self {
            symbol: symbol.into(),
            timeframe,
            store,
            feed,
            clock,
            worker_config,
            worker: None,
            inbox: None,
            subscribers: Vec::new(),
            next_subscriber: 0,
            use_count: 0,
            memo_count: Memo::Unknown,
            memo_newest: Memo::Unknown,
            memo_oldest: Memo::Unknown,
            memo_current: Memo::Unknown,
            last_syncing: None,
        })
    }

    pub fn shared(self) -> SharedPriceData {
        Rc::new(RefCell::new(self))
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    pub fn period_secs(&self) -> i64 {
        self.timeframe.period_secs()
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn is_simulated(&self) -> bool {
        self.clock.is_simulated()
    }

    pub fn use_count(&self) -> usize {
        self.use_count
    }

    pub fn has_active_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn count(&mut self) -> Result<usize> {
        if let Some(count) = self.memo_count.known() {
            return Ok(count);
        }
        let count = if self.clock.is_simulated() {
            let now = self.clock.now();
            self.store.count_at_or_before(now)?
        } else {
            self.store.count()?
        };
        self.memo_count.set(count);
        Ok(count)
    }

    pub fn newest(&mut self) -> Result<Option<Candle>> {
        if let Some(value) = self.memo_newest.known() {
            return Ok(value);
        }
        let value = if self.clock.is_simulated() {
            let count = self.count()?;
            if count == 0 {
                None
            } else {
                self.store.select_range(count - 1, 1)?.pop()
            }
        } else {
            self.store.newest()?
        };
        self.memo_newest.set(value.clone());
        Ok(value)
    }

    pub fn oldest(&mut self) -> Result<Option<Candle>> {
        if let Some(value) = self.memo_oldest.known() {
            return Ok(value);
        }
        let value = if self.clock.is_simulated() && self.count()? == 0 {
            None
        } else {
            self.store.oldest()?
        };
        self.memo_oldest.set(value.clone());
        Ok(value)
    }

    pub fn current(&mut self) -> Result<Option<Candle>> {
        if let Some(value) = self.memo_current.known() {
            return Ok(value);
        }
        let period = self.period_secs();
        let now = self.clock.now();
        let value = match self.newest()? {
            Some(candle) if self.clock.is_simulated() && candle.covers(now, period) => {
                Some(sub_candle(&candle, now, period))
            }
            other => other,
        };
        self.memo_current.set(value.clone());
        Ok(value)
    }

    pub fn count_to(&mut self, time: i64) -> Result<usize> {
        let cutoff = time.min(self.clock.now());
        self.store.count_at_or_before(cutoff)
    }

    pub fn read_candles(&mut self, range: IndexRange) -> Result<Vec<Candle>> {
        let total = self.count()?;
        assert!(range.end <= total, "read range exceeds candle count");
        let mut candles = self.store.select_range(range.begin, range.len())?;
        if self.clock.is_simulated() {
            let period = self.period_secs();
            let now = self.clock.now();
            if let Some(last) = candles.last_mut() {
                if last.covers(now, period) {
                    *last = sub_candle(last, now, period);
                }
            }
        }
        Ok(candles)
    }

    pub fn add(&mut self, candle: Candle) -> Result<()> {
        let period = self.period_secs();
        let stored_newest = self.store.newest()?;

        let kind = match &stored_newest {
            None => UpdateKind::New,
            Some(newest) if candle.time == newest.time + period => UpdateKind::New,
            Some(newest) if candle.time >= newest.time && candle.time < newest.time + period => {
                UpdateKind::Current
            }
            Some(_) => UpdateKind::Range,
        };

        match kind {
            UpdateKind::New => {
                self.store.upsert(&candle)?;
                if let Some(count) = self.memo_count.known() {
                    self.memo_count.set(count + 1);
                }
                self.memo_newest.set(Some(candle.clone()));
                self.memo_current.set(Some(candle.clone()));
                let total = self.count()?;
                self.emit_changed(kind, IndexRange::new(total - 1, total), Some(candle));
            }
            UpdateKind::Current => {
                let newest = stored_newest.expect("current update requires a newest candle");
                let merged = merge_update(&newest, &candle);
                self.store.upsert(&merged)?;
                self.memo_newest.set(Some(merged.clone()));
                self.memo_current.set(Some(merged.clone()));
                let total = self.count()?;
                self.emit_changed(kind, IndexRange::new(total - 1, total), Some(merged));
            }
            UpdateKind::Range => {
                self.store.upsert(&candle)?;
                self.invalidate_summaries();
                let total = self.count()?;
                self.emit_changed(kind, IndexRange::new(0, total), Some(candle));
            }
        }
        self.update_syncing()
    }

    pub fn add_batch(&mut self, candles: &[Candle]) -> Result<()> {
        if candles.is_empty() {
            return Ok(());
        }
        self.store.upsert_many(candles)?;
        self.invalidate_summaries();
        let total = self.count()?;
        self.emit_changed(UpdateKind::Range, IndexRange::new(0, total), None);
        self.update_syncing()
    }

    // Replays New/Current/Range classification against the simulation clock
    // without touching the store; driven once per simulated tick.
    pub fn simulation_update(&mut self, force_invalidate: bool) -> Result<()> {
        let now = self.clock.now();
        let visible = self.store.count_at_or_before(now)?;

        if force_invalidate {
            self.invalidate_summaries();
            self.memo_count.set(visible);
            self.emit_changed(UpdateKind::Range, IndexRange::new(0, visible), None);
            return self.update_syncing();
        }

        let period = self.period_secs();
        match self.memo_count.known() {
            Some(previous) if visible == previous + 1 => {
                let candle = self
                    .store
                    .select_range(visible - 1, 1)?
                    .pop()
                    .ok_or_else(|| Error::new("visible candle missing from store"))?;
                let current = if candle.covers(now, period) {
                    sub_candle(&candle, now, period)
                } else {
                    candle.clone()
                };
                self.memo_count.set(visible);
                self.memo_newest.set(Some(candle));
                self.memo_current.set(Some(current.clone()));
                self.emit_changed(
                    UpdateKind::New,
                    IndexRange::new(visible - 1, visible),
                    Some(current),
                );
            }
            Some(previous) if visible == previous => {
                if visible == 0 {
                    return self.update_syncing();
                }
                let newest = match self.newest()? {
                    Some(candle) => candle,
                    None => return self.update_syncing(),
                };
                let current = if newest.covers(now, period) {
                    sub_candle(&newest, now, period)
                } else {
                    newest
                };
                self.memo_current.set(Some(current.clone()));
                self.emit_changed(
                    UpdateKind::Current,
                    IndexRange::new(visible - 1, visible),
                    Some(current),
                );
            }
            _ => {
                self.invalidate_summaries();
                self.memo_count.set(visible);
                self.emit_changed(UpdateKind::Range, IndexRange::new(0, visible), None);
            }
        }
        self.update_syncing()
    }

    pub fn data_syncing(&mut self) -> Result<bool> {
        let period = self.period_secs();
        match self.newest()? {
            None => Ok(true),
            Some(candle) => Ok(self.clock.now() > candle.time + period),
        }
    }

    // External collaborators (e.g. a market-depth feed) may re-raise the
    // current candle to trigger dependent consumers without a data change.
    pub fn raise_current(&mut self, range: IndexRange, candle: Candle) {
        self.emit_changed(UpdateKind::Current, range, Some(candle));
    }

    pub fn subscribe(&mut self) -> EventSubscription {
        let id = self.next_subscriber;
        self.next_subscriber += 1;
        let (tx, rx) = channel();
        self.subscribers.push((id, tx));
        EventSubscription { id, events: rx }
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    pub fn acquire(shared: &SharedPriceData) -> Result<UsageToken> {
        {
            let mut data = shared.borrow_mut();
            data.use_count += 1;
            if data.use_count == 1 && !data.clock.is_simulated() {
                data.start_sync()?;
            }
        }
        Ok(UsageToken {
            shared: Rc::clone(shared),
        })
    }

    fn release(&mut self) {
        self.use_count = self.use_count.saturating_sub(1);
        if self.use_count == 0 {
            self.stop_sync();
        }
    }

    pub fn start_sync(&mut self) -> Result<()> {
        assert!(
            !self.clock.is_simulated(),
            "cannot start live sync while simulating"
        );
        let feed = match &self.feed {
            Some(feed) => Arc::clone(feed),
            None => return Ok(()),
        };
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        let period = self.period_secs();
        let backfill = period.saturating_mul(self.worker_config.backfill_candles.max(1) as i64);
        let begin = match self.store.newest()? {
            Some(candle) => candle.time,
            None => self.clock.now() - backfill,
        };
        let (tx, rx) = channel();
        self.inbox = Some(rx);
        self.worker = Some(SyncWorker::spawn(
            feed,
            Arc::clone(&self.clock),
            tx,
            self.symbol.clone(),
            self.timeframe,
            begin,
            self.worker_config.clone(),
        ));
        debug!(symbol = %self.symbol, timeframe = self.timeframe.as_str(), "live sync started");
        Ok(())
    }

    // The inbox is kept so already-fetched batches can still be pumped.
    pub fn stop_sync(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
            debug!(symbol = %self.symbol, "live sync stopped");
        }
    }

    // Coordinator-context drain of the worker's hand-off channel. The worker
    // itself never mutates shared state.
    pub fn pump_sync(&mut self) -> Result<usize> {
        let mut batches: Vec<Vec<Candle>> = Vec::new();
        if let Some(inbox) = &self.inbox {
            loop {
                match inbox.try_recv() {
                    Ok(batch) => batches.push(batch),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }
        let mut applied = 0;
        for batch in batches {
            applied += batch.len();
            if batch.len() <= 2 {
                for candle in batch {
                    self.add(candle)?;
                }
            } else {
                self.add_batch(&batch)?;
            }
        }
        Ok(applied)
    }

    fn invalidate_summaries(&mut self) {
        self.memo_count.invalidate();
        self.memo_newest.invalidate();
        self.memo_oldest.invalidate();
        self.memo_current.invalidate();
    }

    fn emit_changed(&mut self, kind: UpdateKind, range: IndexRange, candle: Option<Candle>) {
        self.emit(DataEvent::Changed(DataChanged {
            kind,
            range,
            candle,
        }));
    }

    fn emit(&mut self, event: DataEvent) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    fn update_syncing(&mut self) -> Result<()> {
        let value = self.data_syncing()?;
        let previous = self.last_syncing.unwrap_or(false);
        self.last_syncing = Some(value);
        if value != previous {
            self.emit(DataEvent::SyncingChanged { syncing: value });
        }
        Ok(())
    }
}

impl Drop for PriceData {
    fn drop(&mut self) {
        self.stop_sync();
    }
}

// Deterministic truncation of a candle to its state partway through the
// period: every field stays within the bounds of the full candle and high/low
// are monotonic in elapsed time.
pub fn sub_candle(candle: &Candle, now: i64, period_secs: i64) -> Candle {
    let elapsed = (now - candle.time).clamp(0, period_secs);
    let fraction = elapsed as f64 / period_secs as f64;
    let close = candle.open + (candle.close - candle.open) * fraction;
    let high = candle
        .open
        .max(close)
        .max(candle.open + (candle.high - candle.open) * fraction);
    let low = candle
        .open
        .min(close)
        .min(candle.open - (candle.open - candle.low) * fraction);
    Candle {
        time: candle.time,
        open: candle.open,
        high,
        low,
        close,
        median: (high + low) / 2.0,
        volume: candle.volume * fraction,
    }
}

fn merge_update(existing: &Candle, incoming: &Candle) -> Candle {
    let high = existing.high.max(incoming.high);
    let low = existing.low.min(incoming.low);
    Candle {
        time: existing.time,
        open: existing.open,
        high,
        low,
        close: incoming.close,
        median: (high + low) / 2.0,
        volume: incoming.volume,
    }
}
