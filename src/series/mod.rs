pub mod instrument;
pub mod price_data;
pub mod registry;
pub mod worker;

pub use instrument::{Instrument, CHUNK_SIZE};
pub use price_data::{sub_candle, EventSubscription, PriceData, SharedPriceData, UsageToken};
pub use registry::{SeriesHandle, SeriesProvider, SeriesRegistry};
pub use worker::{SyncWorker, WorkerConfig};

use crate::models::Candle;

// Insertion position for `time` in a time-ordered slice: the index of the
// first candle with time > `time`. The candle at-or-before `time` is at
// `insertion_index(..) - 1` when that is in range.
pub fn insertion_index(candles: &[Candle], time: i64) -> usize {
    let mut low = 0usize;
    let mut high = candles.len();
    while low < high {
        let mid = low + (high - low) / 2;
        if candles[mid].time <= time {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}
