//! qs-md
//!
//! Historical market-data boundary.
//!
//! - `BarRecord` + `validate_bar` quality gate (finite, non-negative, OHLC-consistent)
//! - `BarSource` trait: bars for one symbol over an inclusive time range
//! - `CsvBarSource`: CSV file, bad rows skipped and counted
//! - `MemoryBarSource`: in-memory bars for tests and replays
//!
//! Providers that fetch from exchanges are out of scope; anything that yields
//! timestamped OHLCV rows can implement `BarSource`.

mod bar;
mod source;

pub use bar::{parse_timestamp, sort_bars, validate_bar, BarError, BarRecord};
pub use source::{BarSource, CsvBarSource, MemoryBarSource, SourceError};
