use crate::models::{Candle, DataChanged, DataEvent, IndexRange, Memo, TimeFrame, UpdateKind};
use crate::series::insertion_index;
use crate::series::price_data::{EventSubscription, PriceData, SharedPriceData, UsageToken};
use crate::Result;
use std::rc::Rc;

pub const CHUNK_SIZE: usize = 10_000;

struct CachedWindow {
    range: IndexRange,
    candles: Vec<Candle>,
}

enum Grow {
    Init(IndexRange),
    Forward(IndexRange),
    Backward(IndexRange),
    Noop,
}

pub struct Instrument {
    source: SharedPriceData,
    timeframe: TimeFrame,
    subscription: EventSubscription,
    _token: UsageToken,
    memo_count: Memo<usize>,
    cached: Option<CachedWindow>,
}

impl Instrument {
    pub fn new(source: &SharedPriceData) -> Result<Self> {
        let token = PriceData::acquire(source)?;
        let (timeframe, subscription) = {
            let mut data = source.borrow_mut();
            (data.timeframe(), data.subscribe())
        };
        Ok(Self {
            source: Rc::clone(source),
            timeframe,
            subscription,
            _token: token,
            memo_count: Memo::Unknown,
            cached: None,
        })
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    pub fn count(&mut self) -> Result<usize> {
        self.sync_events()?;
        self.count_inner()
    }

    pub fn candle_at(&mut self, index: usize) -> Result<Candle> {
        self.sync_events()?;
        self.candle_inner(index)
    }

    pub fn latest(&mut self) -> Result<Option<Candle>> {
        self.sync_events()?;
        self.latest_inner()
    }

    pub fn ensure_cached(&mut self, index: usize) -> Result<()> {
        self.sync_events()?;
        self.ensure_cached_inner(index)
    }

    pub fn index_at(&mut self, time: i64) -> Result<Option<usize>> {
        self.sync_events()?;
        self.index_at_inner(time)
    }

    pub fn findex_at(&mut self, time: i64) -> Result<f64> {
        self.sync_events()?;
        self.findex_at_inner(time)
    }

    pub fn time_at_findex(&mut self, findex: f64) -> Result<i64> {
        self.sync_events()?;
        self.time_at_findex_inner(findex)
    }

    pub fn index_range(&mut self, min: usize, max: usize) -> Result<IndexRange> {
        self.sync_events()?;
        assert!(min <= max, "index range min must be <= max");
        let total = self.count_inner()?;
        Ok(IndexRange::new(min.min(total), max.min(total)))
    }

    pub fn time_to_index_range(&mut self, tmin: i64, tmax: i64) -> Result<IndexRange> {
        self.sync_events()?;
        assert!(tmin <= tmax, "time range min must be <= max");
        let total = self.count_inner()?;
        if total == 0 {
            return Ok(IndexRange::empty());
        }
        let begin = self.index_at_inner(tmin)?.unwrap_or(0);
        let end = match self.index_at_inner(tmax)? {
            Some(index) => index + 1,
            None => 0,
        };
        Ok(IndexRange::new(begin.min(total), end.min(total)))
    }

    pub fn invalidate_cached_data(&mut self) {
        self.cached = None;
    }

    pub fn cached_range(&self) -> Option<IndexRange> {
        self.cached.as_ref().map(|window| window.range)
    }

    fn sync_events(&mut self) -> Result<()> {
        let mut pending = Vec::new();
        while let Ok(event) = self.subscription.events.try_recv() {
            pending.push(event);
        }
        for event in pending {
            self.apply_event(event)?;
        }
        Ok(())
    }

    fn apply_event(&mut self, event: DataEvent) -> Result<()> {
        match event {
            DataEvent::SyncingChanged { .. } => Ok(()),
            DataEvent::Changed(change) => match change.kind {
                UpdateKind::New => self.apply_new(change),
                UpdateKind::Current => self.apply_current(change),
                UpdateKind::Range => {
                    self.cached = None;
                    self.memo_count.invalidate();
                    Ok(())
                }
            },
        }
    }

    fn apply_new(&mut self, change: DataChanged) -> Result<()> {
        let Some(candle) = change.candle else {
            panic!("new update is missing its candle");
        };
        let period = self.timeframe.period_secs();

        let extends_tail = match (self.memo_count.known(), &self.cached) {
            (Some(total), Some(window)) if window.range.end == total => window
                .candles
                .last()
                .map(|last| last.time + period == candle.time)
                .unwrap_or(false),
            _ => false,
        };

        if extends_tail {
            let total = self.memo_count.known().expect("count known on fast path");
            let window = self.cached.as_mut().expect("cache present on fast path");
            window.candles.push(candle);
            window.range.end += 1;
            self.memo_count.set(total + 1);
        } else {
            self.memo_count.invalidate();
            let total = self.count_inner()?;
            if total > 0 {
                self.ensure_cached_inner(total - 1)?;
            }
        }
        Ok(())
    }

    fn apply_current(&mut self, change: DataChanged) -> Result<()> {
        assert!(
            change.range.len() == 1,
            "current update must address a single candle"
        );
        if let Some(total) = self.memo_count.known() {
            assert!(
                total > 0 && change.range.begin == total - 1,
                "current update must address the last index"
            );
        }
        let Some(candle) = change.candle else {
            panic!("current update is missing its candle");
        };
        if let Some(window) = self.cached.as_mut() {
            if window.range.contains(change.range.begin) {
                let offset = change.range.begin - window.range.begin;
                window.candles[offset] = candle;
            }
        }
        Ok(())
    }

    fn count_inner(&mut self) -> Result<usize> {
        if let Some(count) = self.memo_count.known() {
            return Ok(count);
        }
        let count = {
            let mut data = self.source.borrow_mut();
            let now = data.now();
            data.count_to(now)?
        };
        self.memo_count.set(count);
        Ok(count)
    }

    fn candle_inner(&mut self, index: usize) -> Result<Candle> {
        self.ensure_cached_inner(index)?;
        let window = self.cached.as_ref().expect("cache populated");
        Ok(window.candles[index - window.range.begin].clone())
    }

    fn latest_inner(&mut self) -> Result<Option<Candle>> {
        let total = self.count_inner()?;
        if total == 0 {
            Ok(None)
        } else {
            self.candle_inner(total - 1).map(Some)
        }
    }

    fn ensure_cached_inner(&mut self, index: usize) -> Result<()> {
        let total = self.count_inner()?;
        assert!(index < total, "candle index {index} out of range (count {total})");

        let action = match &self.cached {
            None => {
                let begin = index.saturating_sub(CHUNK_SIZE);
                let end = (index + CHUNK_SIZE).min(total);
                Grow::Init(IndexRange::new(begin, end))
            }
            Some(window) if index >= window.range.end => {
                let needed = index + 1 - window.range.end;
                let chunks = needed.div_ceil(CHUNK_SIZE);
                let end = (window.range.end + chunks * CHUNK_SIZE).min(total);
                Grow::Forward(IndexRange::new(window.range.end, end))
            }
            Some(window) if index < window.range.begin => {
                let needed = window.range.begin - index;
                let chunks = needed.div_ceil(CHUNK_SIZE);
                let begin = window.range.begin.saturating_sub(chunks * CHUNK_SIZE);
                Grow::Backward(IndexRange::new(begin, window.range.begin))
            }
            Some(_) => Grow::Noop,
        };

        match action {
            Grow::Init(range) => {
                let candles = self.read_source(range)?;
                self.cached = Some(CachedWindow { range, candles });
            }
            Grow::Forward(range) => {
                let more = self.read_source(range)?;
                let window = self.cached.as_mut().expect("cache present");
                window.candles.extend(more);
                window.range.end = range.end;
            }
            Grow::Backward(range) => {
                let more = self.read_source(range)?;
                let window = self.cached.as_mut().expect("cache present");
                window.candles.splice(0..0, more);
                window.range.begin = range.begin;
            }
            Grow::Noop => {}
        }
        Ok(())
    }

    fn read_source(&self, range: IndexRange) -> Result<Vec<Candle>> {
        self.source.borrow_mut().read_candles(range)
    }

    fn index_at_inner(&mut self, time: i64) -> Result<Option<usize>> {
        assert!(!self.timeframe.is_none(), "time frame is not set");
        let total = self.count_inner()?;
        if total == 0 {
            return Ok(None);
        }
        let latest = self.candle_inner(total - 1)?;
        if time >= latest.time {
            return Ok(Some(total - 1));
        }

        let in_window = match &self.cached {
            Some(window) if !window.candles.is_empty() => {
                let first = window.candles[0].time;
                let last = window.candles[window.candles.len() - 1].time;
                time >= first && time <= last
            }
            _ => false,
        };

        if in_window {
            let window = self.cached.as_ref().expect("cache present");
            let position = insertion_index(&window.candles, time);
            Ok(Some(window.range.begin + position - 1))
        } else {
            let positioned = self.source.borrow_mut().count_to(time)?;
            if positioned == 0 {
                return Ok(None);
            }
            let index = positioned - 1;
            self.ensure_cached_inner(index)?;
            Ok(Some(index))
        }
    }

    fn findex_at_inner(&mut self, time: i64) -> Result<f64> {
        assert!(!self.timeframe.is_none(), "time frame is not set");
        let total = self.count_inner()?;
        assert!(total > 0, "fractional index on empty instrument");
        let period = self.timeframe.period_secs() as f64;
        match self.index_at_inner(time)? {
            Some(index) => {
                let candle = self.candle_inner(index)?;
                Ok(index as f64 + (time - candle.time) as f64 / period)
            }
            None => {
                let first = self.candle_inner(0)?;
                Ok((time - first.time) as f64 / period)
            }
        }
    }

    fn time_at_findex_inner(&mut self, findex: f64) -> Result<i64> {
        assert!(!self.timeframe.is_none(), "time frame is not set");
        let total = self.count_inner()?;
        assert!(total > 0, "time lookup on empty instrument");
        let period = self.timeframe.period_secs() as f64;
        let floor = findex.floor();
        if floor < 0.0 {
            let first = self.candle_inner(0)?;
            Ok(first.time + (findex * period).round() as i64)
        } else if floor as usize >= total - 1 {
            let last = self.candle_inner(total - 1)?;
            Ok(last.time + ((findex - (total - 1) as f64) * period).round() as i64)
        } else {
            let index = floor as usize;
            let candle = self.candle_inner(index)?;
            Ok(candle.time + ((findex - floor) * period).round() as i64)
        }
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        self.source.borrow_mut().unsubscribe(self.subscription.id);
    }
}
