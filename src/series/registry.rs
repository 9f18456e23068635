use crate::data::Clock;
use crate::exchange::CandleFeed;
use crate::models::TimeFrame;
use crate::series::price_data::{PriceData, SharedPriceData, UsageToken};
use crate::series::worker::WorkerConfig;
use crate::storage::CandleStore;
use crate::{Error, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

pub trait SeriesProvider {
    fn make_store(&self, symbol: &str, timeframe: TimeFrame) -> Result<Box<dyn CandleStore>>;
    fn feed(&self) -> Option<Arc<dyn CandleFeed>>;
    fn clock(&self) -> Arc<dyn Clock>;
    fn worker_config(&self) -> WorkerConfig;
}

type SeriesKey = (String, TimeFrame);
type SeriesMap = Rc<RefCell<HashMap<SeriesKey, SharedPriceData>>>;

pub struct SeriesRegistry {
    provider: Box<dyn SeriesProvider>,
    series: SeriesMap,
}

pub struct SeriesHandle {
    series: SharedPriceData,
    key: SeriesKey,
    registry: Weak<RefCell<HashMap<SeriesKey, SharedPriceData>>>,
    token: Option<UsageToken>,
}

impl SeriesHandle {
    pub fn series(&self) -> &SharedPriceData {
        &self.series
    }
}

impl Drop for SeriesHandle {
    fn drop(&mut self) {
        self.token.take();
        if let Some(map) = self.registry.upgrade() {
            let mut map = map.borrow_mut();
            let idle = map
                .get(&self.key)
                .map(|shared| shared.borrow().use_count() == 0)
                .unwrap_or(false);
            if idle {
                map.remove(&self.key);
            }
        }
    }
}

impl SeriesRegistry {
    pub fn new(provider: Box<dyn SeriesProvider>) -> Self {
        Self {
            provider,
            series: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn acquire(&mut self, symbol: &str, timeframe: TimeFrame) -> Result<SeriesHandle> {
        if timeframe.is_none() {
            return Err(Error::new("registry requires a concrete time frame"));
        }
        let key = (symbol.to_string(), timeframe);
        let existing = self.series.borrow().get(&key).cloned();
        let shared = match existing {
            Some(shared) => shared,
            None => {
                let store = self.provider.make_store(symbol, timeframe)?;
                let data = PriceData::new(
                    symbol,
                    timeframe,
                    store,
                    self.provider.feed(),
                    self.provider.clock(),
                    self.provider.worker_config(),
                )?;
                let shared = data.shared();
                self.series
                    .borrow_mut()
                    .insert(key.clone(), Rc::clone(&shared));
                shared
            }
        };
        let token = PriceData::acquire(&shared)?;
        Ok(SeriesHandle {
            series: shared,
            key,
            registry: Rc::downgrade(&self.series),
            token: Some(token),
        })
    }

    pub fn len(&self) -> usize {
        self.series.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.borrow().is_empty()
    }

    pub fn contains(&self, symbol: &str, timeframe: TimeFrame) -> bool {
        self.series
            .borrow()
            .contains_key(&(symbol.to_string(), timeframe))
    }
}
