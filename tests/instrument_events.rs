use std::sync::Arc;
use tidemark::data::VirtualClock;
use tidemark::models::{Candle, IndexRange, TimeFrame};
use tidemark::series::{Instrument, PriceData, SharedPriceData};
use tidemark::series::worker::WorkerConfig;
use tidemark::storage::memory::MemoryCandleStore;

fn candle(time: i64, high: f64) -> Candle {
    Candle::new(time, 100.0, high, 95.0, 102.0, 1.0).expect("candle")
}

fn series(count: i64) -> SharedPriceData {
    let candles: Vec<Candle> = (0..count)
        .map(|index| candle(600 + index * 60, 105.0))
        .collect();
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
fn sequential_new_candle_takes_the_fast_path() {
    let shared = series(5);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    assert_eq!(instrument.count().expect("count"), 5);
    // touch the tail so the cached window covers the last index
    instrument.candle_at(4).expect("candle");
    let before = instrument.cached_range().expect("windowed");
    assert_eq!(before.end, 5);

    let added = candle(900, 106.0);
    shared.borrow_mut().add(added.clone()).expect("add");

    assert_eq!(instrument.count().expect("count"), 6);
    let after = instrument.cached_range().expect("windowed");
    assert_eq!(after.begin, before.begin);
    assert_eq!(after.end, 6);
    assert_eq!(instrument.candle_at(5).expect("candle"), added);
}

#[test]
fn new_candle_without_a_cached_tail_recomputes_count() {
    let shared = series(5);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    assert_eq!(instrument.count().expect("count"), 5);
    assert!(instrument.cached_range().is_none());

    shared.borrow_mut().add(candle(900, 106.0)).expect("add");

    assert_eq!(instrument.count().expect("count"), 6);
    // the new latest index was ensured-cached by the update
    let range = instrument.cached_range().expect("windowed");
    assert!(range.contains(5));
}

#[test]
fn current_update_replaces_the_cached_entry_in_place() {
    let shared = series(5);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    instrument.candle_at(4).expect("candle");

    shared.borrow_mut().add(candle(840, 111.0)).expect("add");

    assert_eq!(instrument.count().expect("count"), 5);
    let merged = instrument.candle_at(4).expect("candle");
    assert_eq!(merged.time, 840);
    assert_eq!(merged.high, 111.0);
}

#[test]
fn re_raised_current_notification_is_accepted() {
    let shared = series(5);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    instrument.candle_at(4).expect("candle");

    let last = instrument.candle_at(4).expect("candle");
    shared
        .borrow_mut()
        .raise_current(IndexRange::single(4), last.clone());

    assert_eq!(instrument.count().expect("count"), 5);
    assert_eq!(instrument.candle_at(4).expect("candle"), last);
}

#[test]
#[should_panic(expected = "single candle")]
fn multi_item_current_update_is_fatal() {
    let shared = series(5);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    assert_eq!(instrument.count().expect("count"), 5);

    let last = candle(840, 105.0);
    shared
        .borrow_mut()
        .raise_current(IndexRange::new(3, 5), last);
    let _ = instrument.count();
}

#[test]
#[should_panic(expected = "last index")]
fn current_update_off_the_last_index_is_fatal() {
    let shared = series(5);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    assert_eq!(instrument.count().expect("count"), 5);

    let stale = candle(600, 105.0);
    shared
        .borrow_mut()
        .raise_current(IndexRange::single(0), stale);
    let _ = instrument.count();
}

#[test]
fn range_event_drops_the_whole_cache() {
    let shared = series(5);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    instrument.candle_at(4).expect("candle");
    assert!(instrument.cached_range().is_some());

    let batch: Vec<Candle> = (0..8).map(|index| candle(600 + index * 60, 107.0)).collect();
    shared.borrow_mut().add_batch(&batch).expect("add batch");

    assert_eq!(instrument.count().expect("count"), 8);
    assert!(instrument.cached_range().is_none());

    // lazily re-derived on the next indexed access
    let reloaded = instrument.candle_at(7).expect("candle");
    assert_eq!(reloaded.time, 600 + 7 * 60);
    assert!(instrument.cached_range().is_some());
}

#[test]
fn instruments_observe_updates_in_application_order() {
    let shared = series(3);
    let mut instrument = Instrument::new(&shared).expect("instrument");
    assert_eq!(instrument.count().expect("count"), 3);
    instrument.candle_at(2).expect("candle");

    {
        let mut data = shared.borrow_mut();
        data.add(candle(780, 106.0)).expect("add");
        data.add(candle(840, 107.0)).expect("add");
        data.add(candle(840, 109.0)).expect("add");
    }

    assert_eq!(instrument.count().expect("count"), 5);
    assert_eq!(instrument.candle_at(3).expect("candle").high, 106.0);
    assert_eq!(instrument.candle_at(4).expect("candle").high, 109.0);
}
