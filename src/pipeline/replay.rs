//! Balance Replayer: event sequences into per-address balance trajectories
//!
//! Every mode is the same left fold over a [`ReplayState`]:
//! `state' = step(state, event)`. Events are first ordered by timestamp with a
//! stable sort, so same-second events keep their insertion order and replays
//! are reproducible.
//!
//! Sign conventions for pivot replays are separate named operations:
//!
//! | operation                   | transfer *to* pivot | transfer *from* pivot |
//! |-----------------------------|---------------------|-----------------------|
//! | `replay_deposit_positions`  | sender `+amount`    | receiver `-amount`    |
//! | `replay_holder_flows`       | sender `-amount`    | receiver `+amount`    |

use super::events::{LiquiditySet, TransferSet};
use super::types::{Address, LegPolicy, TransferEvent};
use crate::error::{AttributionError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One trajectory point: `address` held `balance_after` once the event at
/// `timestamp` was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancePoint {
    pub timestamp: i64,
    /// `None` for sources without block numbers (liquidity tables)
    pub block_number: Option<u64>,
    pub tx_hash: String,
    pub address: Address,
    pub balance_after: i128,
}

/// Single-address balance change fed to the fold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub timestamp: i64,
    pub block_number: Option<u64>,
    pub tx_hash: String,
    pub address: Address,
    pub delta: i128,
}

impl LedgerEntry {
    fn from_transfer(event: &TransferEvent, address: &Address, delta: i128) -> Self {
        Self {
            timestamp: event.timestamp,
            block_number: Some(event.block_number),
            tx_hash: event.tx_hash.clone(),
            address: address.clone(),
            delta,
        }
    }
}

/// Running balances threaded through the fold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayState {
    balances: HashMap<Address, i128>,
}

impl ReplayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, address: &Address) -> i128 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &HashMap<Address, i128> {
        &self.balances
    }

    /// Sum over every tracked address; zero for any closed transfer replay.
    /// `None` if the sum leaves the `i128` range.
    pub fn total(&self) -> Option<i128> {
        self.balances.values().try_fold(0i128, |acc, b| acc.checked_add(*b))
    }

    fn apply(&mut self, entry: &LedgerEntry, points: &mut Vec<BalancePoint>) -> Result<()> {
        let balance = self.balances.entry(entry.address.clone()).or_insert(0);
        *balance = balance.checked_add(entry.delta).ok_or_else(|| {
            AttributionError::Overflow(format!(
                "balance of {} in tx {}",
                entry.address, entry.tx_hash
            ))
        })?;
        points.push(BalancePoint {
            timestamp: entry.timestamp,
            block_number: entry.block_number,
            tx_hash: entry.tx_hash.clone(),
            address: entry.address.clone(),
            balance_after: *balance,
        });
        Ok(())
    }

    /// Apply one transfer: debit the sender, then credit the receiver
    pub fn step(mut self, event: &TransferEvent, points: &mut Vec<BalancePoint>) -> Result<Self> {
        for entry in transfer_legs(event)? {
            self.apply(&entry, points)?;
        }
        Ok(self)
    }

    /// Apply one single-address ledger entry
    pub fn step_entry(mut self, entry: &LedgerEntry, points: &mut Vec<BalancePoint>) -> Result<Self> {
        self.apply(entry, points)?;
        Ok(self)
    }
}

fn transfer_legs(event: &TransferEvent) -> Result<[LedgerEntry; 2]> {
    let debit = negate(event.amount, &event.tx_hash)?;
    Ok([
        LedgerEntry::from_transfer(event, &event.from_address, debit),
        LedgerEntry::from_transfer(event, &event.to_address, event.amount),
    ])
}

fn negate(amount: i128, tx_hash: &str) -> Result<i128> {
    amount
        .checked_neg()
        .ok_or_else(|| AttributionError::Overflow(format!("amount {} in tx {}", amount, tx_hash)))
}

/// Result of a replay: every point in processing order plus the final state
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    points: Vec<BalancePoint>,
    state: ReplayState,
}

impl Trajectory {
    pub fn points(&self) -> &[BalancePoint] {
        &self.points
    }

    pub fn state(&self) -> &ReplayState {
        &self.state
    }

    pub fn final_balance(&self, address: &Address) -> i128 {
        self.state.balance(address)
    }

    pub fn final_balances(&self) -> &HashMap<Address, i128> {
        self.state.balances()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points grouped per address, each group in processing order
    pub fn by_address(&self) -> BTreeMap<&Address, Vec<&BalancePoint>> {
        let mut grouped: BTreeMap<&Address, Vec<&BalancePoint>> = BTreeMap::new();
        for point in &self.points {
            grouped.entry(&point.address).or_default().push(point);
        }
        grouped
    }
}

/// Resume a replay from `state` over already-ordered transfers
///
/// Fails with `Overflow` if a balance leaves the `i128` range.
pub fn replay_from<'a, I>(state: ReplayState, events: I) -> Result<Trajectory>
where
    I: IntoIterator<Item = &'a TransferEvent>,
{
    let mut points = Vec::new();
    let state = events
        .into_iter()
        .try_fold(state, |state, event| state.step(event, &mut points))?;
    Ok(Trajectory { points, state })
}

/// Fold single-address entries in ascending timestamp order (stable)
pub fn replay_ledger(mut entries: Vec<LedgerEntry>) -> Result<Trajectory> {
    entries.sort_by_key(|e| e.timestamp);
    let mut points = Vec::with_capacity(entries.len());
    let state = entries
        .iter()
        .try_fold(ReplayState::new(), |state, entry| state.step_entry(entry, &mut points))?;
    Ok(Trajectory { points, state })
}

/// Global mode: every address tracked independently
pub fn replay(events: &TransferSet) -> Result<Trajectory> {
    let trajectory = replay_from(ReplayState::new(), events.chronological())?;
    log::debug!(
        "Replayed {} transfers into {} balance points across {} addresses",
        events.len(),
        trajectory.points.len(),
        trajectory.state.balances.len()
    );
    Ok(trajectory)
}

/// Pivot mode, liquidity-pool convention: deposits into `pivot` grow the
/// depositor's position, withdrawals from it shrink the receiver's
pub fn replay_deposit_positions(events: &TransferSet, pivot: &Address) -> Result<Trajectory> {
    replay_ledger(pivot_entries(events, pivot, false)?)
}

/// Pivot mode, holder convention: value sent into `pivot` leaves the
/// counter-party, value sent out of it arrives at the counter-party
pub fn replay_holder_flows(events: &TransferSet, pivot: &Address) -> Result<Trajectory> {
    replay_ledger(pivot_entries(events, pivot, true)?)
}

fn pivot_entries(events: &TransferSet, pivot: &Address, holder_view: bool) -> Result<Vec<LedgerEntry>> {
    let mut entries = Vec::new();
    for e in events.iter() {
        let (counter_party, inflow) = if &e.to_address == pivot && &e.from_address != pivot {
            (&e.from_address, true)
        } else if &e.from_address == pivot && &e.to_address != pivot {
            (&e.to_address, false)
        } else {
            continue;
        };
        // deposit view credits inflows; holder view is its mirror image
        let delta = if inflow != holder_view {
            e.amount
        } else {
            negate(e.amount, &e.tx_hash)?
        };
        entries.push(LedgerEntry::from_transfer(e, counter_party, delta));
    }
    Ok(entries)
}

/// Deposit positions against a set of pool addresses
///
/// Transfers between two pools move no user position and are skipped.
pub fn replay_pool_positions(events: &TransferSet, pools: &HashSet<Address>) -> Result<Trajectory> {
    let mut entries = Vec::new();
    for e in events.iter() {
        match (pools.contains(&e.from_address), pools.contains(&e.to_address)) {
            (false, true) => entries.push(LedgerEntry::from_transfer(e, &e.from_address, e.amount)),
            (true, false) => {
                let delta = negate(e.amount, &e.tx_hash)?;
                entries.push(LedgerEntry::from_transfer(e, &e.to_address, delta));
            }
            _ => {}
        }
    }
    replay_ledger(entries)
}

/// Liquidity positions: mint adds the effective amount, burn removes it
pub fn replay_liquidity(events: &LiquiditySet, policy: LegPolicy) -> Result<Trajectory> {
    let entries = events
        .iter()
        .map(|e| {
            let delta = policy
                .effective_amount(e)
                .and_then(|amount| amount.checked_mul(e.event_type.sign()))
                .ok_or_else(|| AttributionError::Overflow(format!("liquidity amount in tx {}", e.tx_hash)))?;
            Ok(LedgerEntry {
                timestamp: e.timestamp,
                block_number: None,
                tx_hash: e.tx_hash.clone(),
                address: e.address.clone(),
                delta,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    replay_ledger(entries)
}
