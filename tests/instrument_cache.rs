use std::sync::Arc;
use tidemark::data::VirtualClock;
use tidemark::models::{Candle, TimeFrame};
use tidemark::series::{Instrument, PriceData, SharedPriceData, CHUNK_SIZE};
use tidemark::series::worker::WorkerConfig;
use tidemark::storage::memory::MemoryCandleStore;

fn candle(time: i64) -> Candle {
    Candle::new(time, 100.0, 105.0, 95.0, 102.0, 1.0).expect("candle")
}

fn series(count: i64) -> SharedPriceData {
    let candles: Vec<Candle> = (0..count).map(|index| candle(600 + index * 60)).collect();
    let store = MemoryCandleStore::with_candles(candles).expect("store");
    let now = 600 + count * 60 + 600;
    PriceData::new(
        "BTCUSDT",
        TimeFrame::M1,
        Box::new(store),
        None,
        Arc::new(VirtualClock::new(now, false)),
        WorkerConfig::default(),
    )
    .expect("price data")
    .shared()
}

#[test]
fn first_ensure_loads_a_window_around_the_index() {
    let shared = series(520_000);
    let mut instrument = Instrument::new(&shared).expect("instrument");

    assert!(instrument.cached_range().is_none());
    instrument.ensure_cached(15_000).expect("ensure");
    let range = instrument.cached_range().expect("windowed");
    assert_eq!(range.begin, 5_000);
    assert_eq!(range.end, 25_000);
}

#[test]
fn far_forward_jump_grows_by_minimal_whole_chunks() {
    let shared = series(520_000);
    let mut instrument = Instrument::new(&shared).expect("instrument");

    instrument.ensure_cached(0).expect("ensure");
    assert_eq!(instrument.cached_range().expect("windowed").begin, 0);
    assert_eq!(instrument.cached_range().expect("windowed").end, CHUNK_SIZE);

    instrument.ensure_cached(500_000).expect("ensure");
    let range = instrument.cached_range().expect("windowed");
    assert_eq!(range.begin, 0);
    assert_eq!(range.end, 510_000);

    // idempotent: a second call must not change the window
    instrument.ensure_cached(500_000).expect("ensure");
    let again = instrument.cached_range().expect("windowed");
    assert_eq!(again, range);

    let loaded = instrument.candle_at(500_000).expect("candle");
    assert_eq!(loaded.time, 600 + 500_000 * 60);
}

#[test]
fn backward_jump_prepends_whole_chunks() {
    let shared = series(520_000);
    let mut instrument = Instrument::new(&shared).expect("instrument");

    instrument.ensure_cached(400_000).expect("ensure");
    let range = instrument.cached_range().expect("windowed");
    assert_eq!(range.begin, 390_000);
    assert_eq!(range.end, 410_000);

    instrument.ensure_cached(389_999).expect("ensure");
    let range = instrument.cached_range().expect("windowed");
    assert_eq!(range.begin, 380_000);
    assert_eq!(range.end, 410_000);

    instrument.ensure_cached(100).expect("ensure");
    let range = instrument.cached_range().expect("windowed");
    assert_eq!(range.begin, 0);
    assert_eq!(range.end, 410_000);

    let first = instrument.candle_at(100).expect("candle");
    assert_eq!(first.time, 600 + 100 * 60);
    let boundary = instrument.candle_at(389_999).expect("candle");
    assert_eq!(boundary.time, 600 + 389_999 * 60);
}

#[test]
fn indexed_reads_are_strictly_time_ascending() {
    let shared = series(200);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    let count = instrument.count().expect("count");
    assert_eq!(count, 200);
    for index in 0..count - 1 {
        let left = instrument.candle_at(index).expect("candle");
        let right = instrument.candle_at(index + 1).expect("candle");
        assert!(left.time < right.time);
    }
}

#[test]
fn latest_returns_the_last_candle() {
    let shared = series(50);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    let latest = instrument.latest().expect("latest").expect("candle");
    assert_eq!(latest.time, 600 + 49 * 60);

    let empty = series(0);
    let mut instrument = Instrument::new(&empty).expect("instrument");
    assert!(instrument.latest().expect("latest").is_none());
}

#[test]
fn invalidate_drops_the_window() {
    let shared = series(50);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    instrument.ensure_cached(10).expect("ensure");
    assert!(instrument.cached_range().is_some());
    instrument.invalidate_cached_data();
    assert!(instrument.cached_range().is_none());
}

#[test]
#[should_panic(expected = "out of range")]
fn indexing_past_the_count_is_fatal() {
    let shared = series(10);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    let _ = instrument.candle_at(10);
}
