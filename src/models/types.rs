use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub median: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self> {
        let candle = Self {
            time,
            open,
            high,
            low,
            close,
            median: (high + low) / 2.0,
            volume,
        };
        if !candle.is_valid() {
            return Err(Error::new("candle must satisfy low <= open,close <= high and volume >= 0"));
        }
        Ok(candle)
    }

    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= 0.0
    }

    pub fn covers(&self, time: i64, period_secs: i64) -> bool {
        time >= self.time && time < self.time + period_secs
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeFrame {
    None,
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
    W1,
}

impl TimeFrame {
    pub fn period_secs(self) -> i64 {
        match self {
            TimeFrame::None => panic!("TimeFrame::None has no period"),
            TimeFrame::M1 => 60,
            TimeFrame::M3 => 180,
            TimeFrame::M5 => 300,
            TimeFrame::M15 => 900,
            TimeFrame::M30 => 1_800,
            TimeFrame::H1 => 3_600,
            TimeFrame::H2 => 7_200,
            TimeFrame::H4 => 14_400,
            TimeFrame::H6 => 21_600,
            TimeFrame::H12 => 43_200,
            TimeFrame::D1 => 86_400,
            TimeFrame::W1 => 604_800,
        }
    }

    pub fn is_none(self) -> bool {
        self == TimeFrame::None
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "1m" => Ok(TimeFrame::M1),
            "3m" => Ok(TimeFrame::M3),
            "5m" => Ok(TimeFrame::M5),
            "15m" => Ok(TimeFrame::M15),
            "30m" => Ok(TimeFrame::M30),
            "1h" => Ok(TimeFrame::H1),
            "2h" => Ok(TimeFrame::H2),
            "4h" => Ok(TimeFrame::H4),
            "6h" => Ok(TimeFrame::H6),
            "12h" => Ok(TimeFrame::H12),
            "1d" => Ok(TimeFrame::D1),
            "1w" => Ok(TimeFrame::W1),
            _ => Err(Error::new(format!("unsupported time frame: {value}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeFrame::None => "none",
            TimeFrame::M1 => "1m",
            TimeFrame::M3 => "3m",
            TimeFrame::M5 => "5m",
            TimeFrame::M15 => "15m",
            TimeFrame::M30 => "30m",
            TimeFrame::H1 => "1h",
            TimeFrame::H2 => "2h",
            TimeFrame::H4 => "4h",
            TimeFrame::H6 => "6h",
            TimeFrame::H12 => "12h",
            TimeFrame::D1 => "1d",
            TimeFrame::W1 => "1w",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexRange {
    pub begin: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn new(begin: usize, end: usize) -> Self {
        assert!(begin <= end, "index range begin must be <= end");
        Self { begin, end }
    }

    pub fn empty() -> Self {
        Self { begin: 0, end: 0 }
    }

    pub fn single(index: usize) -> Self {
        Self {
            begin: index,
            end: index + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.begin && index < self.end
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum Memo<T> {
    #[default]
    Unknown,
    Known(T),
}

impl<T: Clone> Memo<T> {
    pub fn known(&self) -> Option<T> {
        match self {
            Memo::Unknown => None,
            Memo::Known(value) => Some(value.clone()),
        }
    }

    pub fn set(&mut self, value: T) {
        *self = Memo::Known(value);
    }

    pub fn invalidate(&mut self) {
        *self = Memo::Unknown;
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Memo::Known(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    New,
    Current,
    Range,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataChanged {
    pub kind: UpdateKind,
    pub range: IndexRange,
    pub candle: Option<Candle>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DataEvent {
    Changed(DataChanged),
    SyncingChanged { syncing: bool },
}
