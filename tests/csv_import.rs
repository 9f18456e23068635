use std::fs;
use std::path::PathBuf;
use tidemark::data::csv::{load_candles_from_csv, parse_time};

fn write_temp(name: &str, content: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("tidemark-test-{}-{name}", std::process::id()));
    fs::write(&path, content).expect("write temp csv");
    path
}

#[test]
fn loads_sorts_and_dedups_rows() {
    let path = write_temp(
        "unsorted.csv",
        "time,open,high,low,close,volume\n\
         180,101.0,106.0,100.0,105.0,2.0\n\
         60,100.0,105.0,95.0,102.0,1.0\n\
         120,102.0,107.0,101.0,106.0,1.5\n\
         120,103.0,108.0,102.0,107.0,1.6\n",
    );
    let candles = load_candles_from_csv(path.to_str().expect("path")).expect("load");
    fs::remove_file(&path).ok();

    assert_eq!(candles.len(), 3);
    assert_eq!(candles[0].time, 60);
    assert_eq!(candles[1].time, 120);
    // the later duplicate wins
    assert_eq!(candles[1].close, 107.0);
    assert_eq!(candles[2].time, 180);
}

#[test]
fn rejects_rows_violating_the_candle_invariant() {
    let path = write_temp(
        "invalid.csv",
        "time,open,high,low,close,volume\n\
         60,100.0,98.0,95.0,97.0,1.0\n",
    );
    let result = load_candles_from_csv(path.to_str().expect("path"));
    fs::remove_file(&path).ok();
    assert!(result.is_err());
}

#[test]
fn accepts_rfc3339_and_epoch_times() {
    assert_eq!(parse_time("60").expect("epoch"), 60);
    assert_eq!(
        parse_time("1970-01-01T00:01:00Z").expect("rfc3339"),
        60
    );
    assert_eq!(
        parse_time("2024-01-01T00:00:00Z").expect("rfc3339"),
        1_704_067_200
    );
    assert!(parse_time("").is_err());
    assert!(parse_time("not a time").is_err());
}
