//! CSV ingestion for transfer and liquidity tables
//!
//! Header-driven: required columns are matched by name, extra columns are
//! ignored. Rows that do not even deserialize into strings (wrong column
//! count) count as malformed records like any other coercion failure.

use super::events::{EventSet, IntoEvent, LiquidityRow, LoadOutcome, TransferRow};
use super::types::{LiquidityEvent, TransferEvent};
use crate::error::{AttributionError, Result};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::Path;

/// Either a row that deserialized, or the reason it did not
enum CsvRow<R> {
    Parsed(R),
    Broken(AttributionError),
}

impl<R: IntoEvent> IntoEvent for CsvRow<R> {
    type Event = R::Event;

    fn into_event(self, line: usize) -> Result<R::Event> {
        match self {
            CsvRow::Parsed(row) => row.into_event(line),
            CsvRow::Broken(err) => Err(err),
        }
    }
}

fn read_rows<R, T>(reader: T) -> Result<Vec<CsvRow<R>>>
where
    R: DeserializeOwned,
    T: Read,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    // Fail fast on a missing or unreadable header
    csv_reader.headers()?;

    Ok(csv_reader
        .deserialize::<R>()
        .enumerate()
        .map(|(idx, row)| match row {
            Ok(row) => CsvRow::Parsed(row),
            Err(e) => CsvRow::Broken(AttributionError::MalformedRecord {
                line: idx + 1,
                field: "row",
                value: e.to_string(),
            }),
        })
        .collect())
}

pub fn read_transfers<T: Read>(reader: T) -> Result<LoadOutcome<TransferEvent>> {
    let rows = read_rows::<TransferRow, _>(reader)?;
    Ok(EventSet::load(rows))
}

pub fn read_liquidity<T: Read>(reader: T) -> Result<LoadOutcome<LiquidityEvent>> {
    let rows = read_rows::<LiquidityRow, _>(reader)?;
    Ok(EventSet::load(rows))
}

pub fn load_transfers(path: impl AsRef<Path>) -> Result<LoadOutcome<TransferEvent>> {
    let path = path.as_ref();
    log::info!("📥 Reading transfers: {}", path.display());
    let outcome = read_transfers(std::fs::File::open(path)?)?;
    log::info!(
        "   └─ {} events ({} duplicates collapsed, {} rejected)",
        outcome.events.len(),
        outcome.duplicates,
        outcome.rejected.len()
    );
    Ok(outcome)
}

pub fn load_liquidity(path: impl AsRef<Path>) -> Result<LoadOutcome<LiquidityEvent>> {
    let path = path.as_ref();
    log::info!("📥 Reading liquidity events: {}", path.display());
    let outcome = read_liquidity(std::fs::File::open(path)?)?;
    log::info!(
        "   └─ {} events ({} duplicates collapsed, {} rejected)",
        outcome.events.len(),
        outcome.duplicates,
        outcome.rejected.len()
    );
    Ok(outcome)
}
