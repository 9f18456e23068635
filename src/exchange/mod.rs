pub mod rest;

use crate::models::{Candle, TimeFrame};
use crate::Result;
use std::sync::atomic::AtomicBool;

#[derive(Clone, Debug)]
pub struct FeedRequest {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub start_time: i64,
    pub end_time: i64,
}

pub trait CandleFeed: Send + Sync {
    fn fetch_candles(&self, request: &FeedRequest, cancel: &AtomicBool) -> Result<Vec<Candle>>;
}
