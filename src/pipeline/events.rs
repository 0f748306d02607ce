//! Event Store: immutable, deduplicated, ordered event collections
//!
//! Rows arrive as untyped strings (see `ingestion`) and are coerced here.
//! A row that fails coercion is rejected with `MalformedRecord` and reported
//! in the [`LoadOutcome`]; the rest of the batch still loads.

use super::types::{Address, LiquidityEvent, LiquidityKind, TransferEvent};
use crate::error::{AttributionError, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

/// Anything that carries a UNIX timestamp in seconds
pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

impl Timestamped for TransferEvent {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for LiquidityEvent {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// A raw row that can be coerced into a typed event
pub trait IntoEvent {
    type Event;

    /// `line` is the 1-based data line, used in error reports
    fn into_event(self, line: usize) -> Result<Self::Event>;
}

/// Transfer table row as read from the event source
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRow {
    pub block_number: String,
    pub timestamp: String,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
}

/// Liquidity table row as read from the event source
#[derive(Debug, Clone, Deserialize)]
pub struct LiquidityRow {
    pub timestamp: String,
    pub tx_hash: String,
    pub address: String,
    pub amount0: String,
    pub amount1: String,
    pub event_type: String,
}

impl IntoEvent for TransferRow {
    type Event = TransferEvent;

    fn into_event(self, line: usize) -> Result<TransferEvent> {
        Ok(TransferEvent {
            block_number: parse_amount(&self.block_number)
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| malformed(line, "block_number", &self.block_number))?,
            timestamp: parse_timestamp(&self.timestamp)
                .ok_or_else(|| malformed(line, "timestamp", &self.timestamp))?,
            tx_hash: self.tx_hash.trim().to_lowercase(),
            from_address: Address::parse(&self.from_address)
                .map_err(|_| malformed(line, "from_address", &self.from_address))?,
            to_address: Address::parse(&self.to_address)
                .map_err(|_| malformed(line, "to_address", &self.to_address))?,
            amount: parse_amount(&self.amount)
                .ok_or_else(|| malformed(line, "amount", &self.amount))?,
        })
    }
}

impl IntoEvent for LiquidityRow {
    type Event = LiquidityEvent;

    fn into_event(self, line: usize) -> Result<LiquidityEvent> {
        Ok(LiquidityEvent {
            timestamp: parse_timestamp(&self.timestamp)
                .ok_or_else(|| malformed(line, "timestamp", &self.timestamp))?,
            tx_hash: self.tx_hash.trim().to_lowercase(),
            address: Address::parse(&self.address)
                .map_err(|_| malformed(line, "address", &self.address))?,
            amount0: parse_amount(&self.amount0)
                .ok_or_else(|| malformed(line, "amount0", &self.amount0))?,
            amount1: parse_amount(&self.amount1)
                .ok_or_else(|| malformed(line, "amount1", &self.amount1))?,
            event_type: self
                .event_type
                .parse::<LiquidityKind>()
                .map_err(|_| malformed(line, "event_type", &self.event_type))?,
        })
    }
}

fn malformed(line: usize, field: &'static str, value: &str) -> AttributionError {
    AttributionError::MalformedRecord {
        line,
        field,
        value: value.to_string(),
    }
}

/// Parse a smallest-unit amount
///
/// Integer text and float renderings (`1000.0`, `1e21`, `1.5E3`) are read
/// exactly, digit by digit, never through `f64`. Rejects non-integral values
/// and anything whose negation does not fit in `i128`, since every transfer
/// is replayed as a debit as well as a credit.
pub fn parse_amount(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    let value = match raw.parse::<i128>() {
        Ok(v) => v,
        Err(_) => parse_decimal(raw)?,
    };
    value.checked_neg().map(|_| value)
}

/// `[-+]digits[.digits][(e|E)[-+]digits]`, integral values only
fn parse_decimal(raw: &str) -> Option<i128> {
    let (mantissa, exponent) = match raw.find(|c: char| c == 'e' || c == 'E') {
        Some(i) => (&raw[..i], raw[i + 1..].parse::<i32>().ok()?),
        None => (raw, 0),
    };
    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{}{}", int_part, frac_part);
    if digits.bytes().all(|b| b == b'0') {
        return Some(0);
    }

    let shift = i64::from(exponent) - frac_part.len() as i64;
    let integral = if shift >= 0 {
        // 10^39 already exceeds i128
        if shift > 39 {
            return None;
        }
        format!("{}{}", digits, "0".repeat(shift as usize))
    } else {
        let dropped = usize::try_from(shift.unsigned_abs()).ok()?;
        if dropped >= digits.len() {
            return None;
        }
        let (head, tail) = digits.split_at(digits.len() - dropped);
        if tail.bytes().any(|b| b != b'0') {
            return None;
        }
        head.to_string()
    };

    let magnitude = integral.parse::<i128>().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Parse UNIX seconds; fractional seconds are truncated
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    let v = raw.parse::<f64>().ok()?;
    if !v.is_finite() || v.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(v.trunc() as i64)
}

/// Calendar-day bucket of a timestamp in the reference timezone
pub fn day_bucket(timestamp: i64, zone: FixedOffset) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.with_timezone(&zone).date_naive())
}

/// Result of loading a batch of rows
#[derive(Debug)]
pub struct LoadOutcome<E> {
    pub events: EventSet<E>,
    /// Per-record rejections (always `MalformedRecord`)
    pub rejected: Vec<AttributionError>,
    /// Rows dropped as exact duplicates of an earlier row
    pub duplicates: usize,
}

/// Immutable, deduplicated event collection in insertion order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSet<E> {
    events: Vec<E>,
}

pub type TransferSet = EventSet<TransferEvent>;
pub type LiquiditySet = EventSet<LiquidityEvent>;

impl<E> EventSet<E>
where
    E: Clone + Eq + Hash + Timestamped,
{
    /// Coerce and deduplicate rows; the first occurrence of a key wins
    pub fn load<R, I>(rows: I) -> LoadOutcome<E>
    where
        R: IntoEvent<Event = E>,
        I: IntoIterator<Item = R>,
    {
        let mut rejected = Vec::new();
        let mut parsed = Vec::new();

        for (idx, row) in rows.into_iter().enumerate() {
            match row.into_event(idx + 1) {
                Ok(event) => parsed.push(event),
                Err(e) => {
                    log::warn!("⚠️  Rejected record: {}", e);
                    rejected.push(e);
                }
            }
        }

        let before = parsed.len();
        let set = Self::from_events(parsed);
        let duplicates = before - set.len();

        if duplicates > 0 {
            log::debug!("Collapsed {} duplicate events", duplicates);
        }

        LoadOutcome {
            events: set,
            rejected,
            duplicates,
        }
    }

    /// Build from already-typed events, deduplicating on full equality
    pub fn from_events(events: Vec<E>) -> Self {
        let mut seen: HashSet<E> = HashSet::with_capacity(events.len());
        let events = events
            .into_iter()
            .filter(|e| seen.insert(e.clone()))
            .collect();
        Self { events }
    }

    pub fn filter<P>(&self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool,
    {
        Self {
            events: self.events.iter().filter(|e| predicate(e)).cloned().collect(),
        }
    }

    /// Keep events whose calendar day is on or before `cutoff`
    pub fn up_to_day(&self, cutoff: NaiveDate, zone: FixedOffset) -> Self {
        self.filter(|e| day_bucket(e.timestamp(), zone).is_some_and(|d| d <= cutoff))
    }

    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in ascending timestamp order, ties kept in insertion order
    pub fn chronological(&self) -> Vec<&E> {
        let mut ordered: Vec<&E> = self.events.iter().collect();
        ordered.sort_by_key(|e| e.timestamp());
        ordered
    }
}

impl EventSet<TransferEvent> {
    /// Every address appearing as sender or receiver
    pub fn addresses(&self) -> BTreeSet<Address> {
        self.events
            .iter()
            .flat_map(|e| [e.from_address.clone(), e.to_address.clone()])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(block: &str, ts: &str, from: &str, to: &str, amount: &str) -> TransferRow {
        TransferRow {
            block_number: block.to_string(),
            timestamp: ts.to_string(),
            tx_hash: "0xabc".to_string(),
            from_address: from.to_string(),
            to_address: to.to_string(),
            amount: amount.to_string(),
        }
    }

    const A: &str = "0x00000000000000000000000000000000000000a1";
    const B: &str = "0x00000000000000000000000000000000000000b2";

    #[test]
    fn test_load_deduplicates_on_composite_key() {
        let rows = vec![
            row("1", "100", A, B, "10"),
            row("1", "100", A, B, "10"),
            row("1", "100", A, B, "11"),
        ];
        let outcome = TransferSet::load(rows);
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.duplicates, 1);
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn test_dedup_ignores_address_case() {
        let rows = vec![
            row("1", "100", A, B, "10"),
            row("1", "100", &A.to_uppercase().replace("0X", "0x"), B, "10"),
        ];
        let outcome = TransferSet::load(rows);
        assert_eq!(outcome.events.len(), 1);
    }

    #[test]
    fn test_malformed_record_rejected_batch_continues() {
        let rows = vec![
            row("1", "100", A, B, "10"),
            row("2", "not-a-time", A, B, "10"),
            row("3", "300", A, B, "lots"),
            row("4", "400", A, B, "1e21"),
        ];
        let outcome = TransferSet::load(rows);
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.rejected.len(), 2);
        assert!(matches!(
            outcome.rejected[0],
            AttributionError::MalformedRecord { line: 2, field: "timestamp", .. }
        ));
        assert!(matches!(
            outcome.rejected[1],
            AttributionError::MalformedRecord { line: 3, field: "amount", .. }
        ));
        assert_eq!(outcome.events.as_slice()[1].amount, 1_000_000_000_000_000_000_000);
    }

    #[test]
    fn test_float_timestamps_accepted() {
        assert_eq!(parse_timestamp("1700000000.0"), Some(1_700_000_000));
        assert_eq!(parse_amount("2500.0"), Some(2500));
        assert_eq!(parse_amount("-7"), Some(-7));
        assert_eq!(parse_amount("NaN"), None);
        assert_eq!(parse_amount("1e21"), Some(1_000_000_000_000_000_000_000));
        assert_eq!(parse_amount("10.5"), None);
    }

    #[test]
    fn test_float_amounts_parse_exactly() {
        assert_eq!(
            parse_amount("123456789012345678901.0"),
            Some(123_456_789_012_345_678_901)
        );
        assert_eq!(parse_amount("1.5E3"), Some(1500));
        assert_eq!(parse_amount("-2.50e1"), Some(-25));
        assert_eq!(parse_amount("0.0e-7"), Some(0));
        assert_eq!(parse_amount("1e-3"), None);
        assert_eq!(parse_amount("1e40"), None);
        assert_eq!(parse_amount("1.2.3"), None);
        assert_eq!(parse_amount("inf"), None);
    }

    #[test]
    fn test_unnegatable_amount_rejected() {
        let min = i128::MIN.to_string();
        assert_eq!(parse_amount(&min), None);
        assert_eq!(parse_amount(&i128::MAX.to_string()), Some(i128::MAX));

        let rows = vec![row("1", "100", A, B, &min), row("2", "200", A, B, "5")];
        let outcome = TransferSet::load(rows);
        assert_eq!(outcome.events.len(), 1);
        assert!(matches!(
            outcome.rejected[0],
            AttributionError::MalformedRecord { line: 1, field: "amount", .. }
        ));
    }

    #[test]
    fn test_cutoff_day_is_inclusive() {
        // 2025-03-17 23:59:59 UTC and 2025-03-18 00:00:00 UTC
        let rows = vec![
            row("1", "1742255999", A, B, "1"),
            row("2", "1742256000", A, B, "2"),
        ];
        let set = TransferSet::load(rows).events;
        let utc = FixedOffset::east_opt(0).unwrap();
        let cutoff = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap();

        let kept = set.up_to_day(cutoff, utc);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.as_slice()[0].amount, 1);
        assert_eq!(day_bucket(1742256000, utc), NaiveDate::from_ymd_opt(2025, 3, 18));
    }

    #[test]
    fn test_reference_zone_shifts_day() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        // 23:00 UTC on 2025-03-17 is already 2025-03-18 at UTC+2
        assert_eq!(day_bucket(1742252400, plus_two), NaiveDate::from_ymd_opt(2025, 3, 18));
    }

    #[test]
    fn test_chronological_is_stable() {
        let rows = vec![
            row("2", "200", A, B, "1"),
            row("1", "100", A, B, "2"),
            row("3", "100", B, A, "3"),
        ];
        let set = TransferSet::load(rows).events;
        let amounts: Vec<i128> = set.chronological().iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![2, 3, 1]);
    }

    #[test]
    fn test_liquidity_rows_load() {
        let rows = vec![
            LiquidityRow {
                timestamp: "10".to_string(),
                tx_hash: "0x1".to_string(),
                address: A.to_string(),
                amount0: "1000".to_string(),
                amount1: "5".to_string(),
                event_type: "mint".to_string(),
            },
            LiquidityRow {
                timestamp: "11".to_string(),
                tx_hash: "0x2".to_string(),
                address: A.to_string(),
                amount0: "1000".to_string(),
                amount1: "5".to_string(),
                event_type: "swap".to_string(),
            },
        ];
        let outcome = LiquiditySet::load(rows);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.events.as_slice()[0].event_type, LiquidityKind::Mint);
    }
}
