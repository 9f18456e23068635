use crate::models::Candle;
use crate::storage::CandleStore;
use crate::{Error, Result};
use std::collections::BTreeMap;

#[derive(Default)]
pub struct MemoryCandleStore {
    candles: BTreeMap<i64, Candle>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self {
            candles: BTreeMap::new(),
        }
    }

    pub fn with_candles(candles: Vec<Candle>) -> Result<Self> {
        let mut store = Self::new();
        store.upsert_many(&candles)?;
        Ok(store)
    }
}

impl CandleStore for MemoryCandleStore {
    fn count(&mut self) -> Result<usize> {
        Ok(self.candles.len())
    }

    fn count_at_or_before(&mut self, time: i64) -> Result<usize> {
        Ok(self.candles.range(..=time).count())
    }

    fn select_range(&mut self, offset: usize, count: usize) -> Result<Vec<Candle>> {
        Ok(self
            .candles
            .values()
            .skip(offset)
            .take(count)
            .cloned()
            .collect())
    }

    fn newest(&mut self) -> Result<Option<Candle>> {
        Ok(self.candles.values().next_back().cloned())
    }

    fn oldest(&mut self) -> Result<Option<Candle>> {
        Ok(self.candles.values().next().cloned())
    }

    fn upsert(&mut self, candle: &Candle) -> Result<()> {
        if !candle.is_valid() {
            return Err(Error::new("refusing to store invalid candle"));
        }
        self.candles.insert(candle.time, candle.clone());
        Ok(())
    }

    fn upsert_many(&mut self, candles: &[Candle]) -> Result<()> {
        for candle in candles {
            if !candle.is_valid() {
                return Err(Error::new("refusing to store invalid candle"));
            }
        }
        for candle in candles {
            self.candles.insert(candle.time, candle.clone());
        }
        Ok(())
    }
}
