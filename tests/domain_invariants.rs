use tidemark::models::{Candle, IndexRange, TimeFrame};

#[test]
fn candle_rejects_high_below_open() {
    let candle = Candle::new(60, 105.0, 104.0, 95.0, 100.0, 1.0);
    assert!(candle.is_err());
}

#[test]
fn candle_rejects_low_above_close() {
    let candle = Candle::new(60, 100.0, 105.0, 101.0, 100.5, 1.0);
    assert!(candle.is_err());
}

#[test]
fn candle_rejects_negative_volume() {
    let candle = Candle::new(60, 100.0, 105.0, 95.0, 102.0, -1.0);
    assert!(candle.is_err());
}

#[test]
fn candle_median_is_midpoint_of_high_and_low() {
    let candle = Candle::new(60, 100.0, 106.0, 96.0, 102.0, 1.0).expect("candle");
    assert_eq!(candle.median, 101.0);
    assert!(candle.is_valid());
}

#[test]
fn candle_covers_its_own_period_only() {
    let candle = Candle::new(60, 100.0, 105.0, 95.0, 102.0, 1.0).expect("candle");
    assert!(candle.covers(60, 60));
    assert!(candle.covers(119, 60));
    assert!(!candle.covers(120, 60));
    assert!(!candle.covers(59, 60));
}

#[test]
fn timeframe_round_trips_through_config_string() {
    for timeframe in [
        TimeFrame::M1,
        TimeFrame::M5,
        TimeFrame::M15,
        TimeFrame::H1,
        TimeFrame::H4,
        TimeFrame::D1,
        TimeFrame::W1,
    ] {
        let parsed = TimeFrame::parse(timeframe.as_str()).expect("parse");
        assert_eq!(parsed, timeframe);
    }
}

#[test]
fn timeframe_periods_are_consistent() {
    assert_eq!(TimeFrame::M1.period_secs(), 60);
    assert_eq!(TimeFrame::H1.period_secs(), 3_600);
    assert_eq!(TimeFrame::D1.period_secs(), 86_400);
    assert_eq!(TimeFrame::H4.period_secs(), 4 * TimeFrame::H1.period_secs());
}

#[test]
fn timeframe_rejects_unknown_string() {
    assert!(TimeFrame::parse("7m").is_err());
    assert!(TimeFrame::parse("").is_err());
}

#[test]
#[should_panic(expected = "no period")]
fn timeframe_none_has_no_period() {
    let _ = TimeFrame::None.period_secs();
}

#[test]
fn index_range_len_and_contains() {
    let range = IndexRange::new(5, 8);
    assert_eq!(range.len(), 3);
    assert!(range.contains(5));
    assert!(range.contains(7));
    assert!(!range.contains(8));
    assert!(!range.contains(4));
    assert!(IndexRange::empty().is_empty());
    assert_eq!(IndexRange::single(3), IndexRange::new(3, 4));
}

#[test]
#[should_panic(expected = "begin must be <= end")]
fn index_range_rejects_inverted_bounds() {
    let _ = IndexRange::new(4, 3);
}
