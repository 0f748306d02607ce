//! CSV reports: running balances, ownership snapshot, attribution records,
//! pool positions and pool shares
//!
//! Balances are written in decimal token units.

use super::attribution::AttributionOutcome;
use super::replay::Trajectory;
use super::shares::PoolShare;
use super::snapshot::BalanceSnapshot;
use super::types::{Address, TokenScale};
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Serialize)]
struct BalancePointRow<'a> {
    timestamp: i64,
    block_number: Option<u64>,
    tx_hash: &'a str,
    address: &'a str,
    balance_after: f64,
}

#[derive(Debug, Serialize)]
struct OwnershipRow<'a> {
    address: &'a str,
    last_balance: f64,
    attributed_balance: f64,
    total_balance: f64,
    wallet_type: &'a str,
}

#[derive(Debug, Serialize)]
struct AttributionRow<'a> {
    address: &'a str,
    source_contract: &'a str,
    attributed_balance: f64,
}

#[derive(Debug, Serialize)]
struct PoolPositionRow<'a> {
    address: &'a str,
    pool_balance: f64,
}

#[derive(Debug, Serialize)]
struct PoolShareRow<'a> {
    address: &'a str,
    percentage_of_pool: f64,
    token_equivalent: f64,
}

/// Every replayed balance change, in processing order, with the transfer
/// that caused it
pub fn write_running_balances<W: Write>(
    trajectory: &Trajectory,
    scale: TokenScale,
    writer: W,
) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for point in trajectory.points() {
        csv_writer.serialize(BalancePointRow {
            timestamp: point.timestamp,
            block_number: point.block_number,
            tx_hash: &point.tx_hash,
            address: point.address.as_str(),
            balance_after: scale.to_units(point.balance_after),
        })?;
    }
    csv_writer.flush()?;
    Ok(trajectory.points().len())
}

/// Final ownership view, sorted by total balance descending
pub fn write_ownership<W: Write>(outcome: &AttributionOutcome, writer: W) -> Result<usize> {
    let scale = outcome.scale;
    let mut csv_writer = csv::Writer::from_writer(writer);
    let ranked = outcome.ranked();

    for (address, entry) in &ranked {
        csv_writer.serialize(OwnershipRow {
            address: address.as_str(),
            last_balance: scale.to_units(entry.last_balance),
            attributed_balance: scale.to_units(entry.attributed_balance),
            total_balance: scale.to_units(entry.total_balance()),
            wallet_type: entry.wallet_type.map(|t| t.as_str()).unwrap_or("unknown"),
        })?;
    }
    csv_writer.flush()?;
    Ok(ranked.len())
}

pub fn write_attributions<W: Write>(outcome: &AttributionOutcome, writer: W) -> Result<usize> {
    let scale = outcome.scale;
    let mut csv_writer = csv::Writer::from_writer(writer);

    for record in &outcome.records {
        csv_writer.serialize(AttributionRow {
            address: record.address.as_str(),
            source_contract: record.source_contract.as_str(),
            attributed_balance: scale.to_units(record.attributed_balance),
        })?;
    }
    csv_writer.flush()?;
    Ok(outcome.records.len())
}

/// Raw net positions, non-positive ones included, sorted by balance descending
pub fn write_pool_positions<W: Write>(positions: &BalanceSnapshot, writer: W) -> Result<usize> {
    let scale = positions.scale();
    let ranked = positions.ranked();

    let mut csv_writer = csv::Writer::from_writer(writer);
    for (address, balance) in &ranked {
        csv_writer.serialize(PoolPositionRow {
            address: address.as_str(),
            pool_balance: scale.to_units(*balance),
        })?;
    }
    csv_writer.flush()?;
    Ok(ranked.len())
}

/// Pool shares, sorted by share descending
pub fn write_pool_shares<W: Write>(shares: &BTreeMap<Address, PoolShare>, writer: W) -> Result<usize> {
    let mut rows: Vec<(&Address, &PoolShare)> = shares.iter().collect();
    rows.sort_by(|a, b| {
        b.1.percentage_of_pool
            .total_cmp(&a.1.percentage_of_pool)
            .then_with(|| a.0.cmp(b.0))
    });

    let mut csv_writer = csv::Writer::from_writer(writer);
    for (address, share) in &rows {
        csv_writer.serialize(PoolShareRow {
            address: address.as_str(),
            percentage_of_pool: share.percentage_of_pool,
            token_equivalent: share.token_equivalent,
        })?;
    }
    csv_writer.flush()?;
    Ok(rows.len())
}

/// Create `path` (and its parent directory) and run `write` against it
pub fn write_file<F>(path: impl AsRef<Path>, write: F) -> Result<usize>
where
    F: FnOnce(std::fs::File) -> Result<usize>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let rows = write(std::fs::File::create(path)?)?;
    log::info!("📝 Wrote {} rows to {}", rows, path.display());
    Ok(rows)
}
