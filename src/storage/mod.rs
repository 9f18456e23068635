pub mod memory;
pub mod postgres;

use crate::models::Candle;
use crate::Result;

pub trait CandleStore {
    fn count(&mut self) -> Result<usize>;
    fn count_at_or_before(&mut self, time: i64) -> Result<usize>;
    fn select_range(&mut self, offset: usize, count: usize) -> Result<Vec<Candle>>;
    fn newest(&mut self) -> Result<Option<Candle>>;
    fn oldest(&mut self) -> Result<Option<Candle>>;
    fn upsert(&mut self, candle: &Candle) -> Result<()>;
    fn upsert_many(&mut self, candles: &[Candle]) -> Result<()>;
}
