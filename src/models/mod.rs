pub mod types;

pub use types::{Candle, DataChanged, DataEvent, IndexRange, Memo, TimeFrame, UpdateKind};
