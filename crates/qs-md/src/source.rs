use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bar::{parse_timestamp, sort_bars, validate_bar, BarRecord};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceError {
    Io(String),
    /// The header row is missing a required column.
    MissingHeader(String),
    /// The source cannot serve this symbol.
    Unavailable { symbol: String, reason: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Io(msg) => write!(f, "market data io error: {msg}"),
            SourceError::MissingHeader(col) => {
                write!(f, "csv missing required header column: '{col}'")
            }
            SourceError::Unavailable { symbol, reason } => {
                write!(f, "no data for {symbol}: {reason}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// Historical bars for one symbol, chronological, inclusive bounds.
pub trait BarSource {
    fn load(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<BarRecord>, SourceError>;
}

fn in_range(ts: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    start.map_or(true, |s| ts >= s) && end.map_or(true, |e| ts <= e)
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

const REQUIRED_COLUMNS: [&str; 7] = ["timestamp", "symbol", "open", "high", "low", "close", "volume"];

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    symbol: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// CSV file with columns `timestamp,symbol,open,high,low,close,volume`
/// (any order, case-insensitive headers). Parsed once on open.
///
/// Rows that fail to parse, fail `validate_bar`, or repeat a
/// (symbol, timestamp) key are skipped and counted.
#[derive(Debug)]
pub struct CsvBarSource {
    path: Option<PathBuf>,
    bars: Vec<BarRecord>,
    skipped: usize,
}

impl CsvBarSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| SourceError::Io(format!("open '{}': {e}", path.display())))?;
        let mut src = Self::from_reader(file)?;
        src.path = Some(path.to_path_buf());
        info!(path = %path.display(), bars = src.bars.len(), skipped = src.skipped, "csv bars loaded");
        Ok(src)
    }

    pub fn from_reader<R: Read>(rdr: R) -> Result<Self, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(rdr);

        let headers = reader
            .headers()
            .map_err(|e| SourceError::Io(format!("csv header: {e}")))?
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect::<Vec<_>>();
        for col in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == col) {
                return Err(SourceError::MissingHeader(col.to_string()));
            }
        }
        reader.set_headers(csv::StringRecord::from(headers));

        let mut bars = Vec::new();
        let mut seen = BTreeSet::new();
        let mut skipped = 0usize;

        for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
            // 1-based, header is line 1
            let line = i + 2;
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    warn!(line, error = %e, "csv row unparseable, skipped");
                    skipped += 1;
                    continue;
                }
            };
            let Some(timestamp) = parse_timestamp(&row.timestamp) else {
                warn!(line, raw = %row.timestamp, "csv timestamp unparseable, skipped");
                skipped += 1;
                continue;
            };
            let rec = BarRecord {
                timestamp,
                symbol: row.symbol,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            };
            if let Err(e) = validate_bar(&rec) {
                warn!(line, symbol = %rec.symbol, error = %e, "bar failed quality gate, skipped");
                skipped += 1;
                continue;
            }
            if !seen.insert((rec.symbol.clone(), rec.timestamp)) {
                warn!(line, symbol = %rec.symbol, ts = %rec.timestamp, "duplicate bar, skipped");
                skipped += 1;
                continue;
            }
            bars.push(rec);
        }

        sort_bars(&mut bars);
        Ok(Self {
            path: None,
            bars,
            skipped,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rows rejected while parsing.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Distinct symbols present in the file.
    pub fn symbols(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.bars.iter().map(|b| b.symbol.as_str()).collect();
        set.into_iter().map(str::to_string).collect()
    }
}

impl BarSource for CsvBarSource {
    fn load(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<BarRecord>, SourceError> {
        let out: Vec<BarRecord> = self
            .bars
            .iter()
            .filter(|b| b.symbol == symbol && in_range(b.timestamp, start, end))
            .cloned()
            .collect();
        debug!(symbol, bars = out.len(), "csv load");
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Bars held in memory. Order of insertion is irrelevant; `load` sorts.
#[derive(Clone, Debug, Default)]
pub struct MemoryBarSource {
    bars: Vec<BarRecord>,
    failing: BTreeSet<String>,
}

impl MemoryBarSource {
    pub fn new(bars: Vec<BarRecord>) -> Self {
        Self {
            bars,
            failing: BTreeSet::new(),
        }
    }

    pub fn push(&mut self, bar: BarRecord) {
        self.bars.push(bar);
    }

    /// Make `load(symbol, ..)` fail.
    pub fn with_failure(mut self, symbol: impl Into<String>) -> Self {
        self.failing.insert(symbol.into());
        self
    }
}

impl BarSource for MemoryBarSource {
    fn load(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<BarRecord>, SourceError> {
        if self.failing.contains(symbol) {
            return Err(SourceError::Unavailable {
                symbol: symbol.to_string(),
                reason: "source failure".to_string(),
            });
        }
        let mut out: Vec<BarRecord> = self
            .bars
            .iter()
            .filter(|b| b.symbol == symbol && in_range(b.timestamp, start, end))
            .cloned()
            .collect();
        sort_bars(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_is_structural_error() {
        let src = "timestamp,symbol,open,high,low,close\n2024-01-01,SPY,1,1,1,1\n";
        assert_eq!(
            CsvBarSource::from_reader(src.as_bytes()).unwrap_err(),
            SourceError::MissingHeader("volume".into())
        );
    }

    #[test]
    fn headers_are_case_insensitive_and_order_free() {
        let src = "Symbol,Close,Open,High,Low,Volume,Timestamp\nSPY,10,9,11,8,100,2024-01-01\n";
        let s = CsvBarSource::from_reader(src.as_bytes()).unwrap();
        let bars = s.load("SPY", None, None).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 10.0);
        assert_eq!(bars[0].open, 9.0);
    }
}
