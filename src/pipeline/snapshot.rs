//! Snapshot Extractor: one balance per address from a trajectory
//!
//! Selection rule: the point with the latest timestamp wins. When several
//! points share that timestamp, the largest observed balance wins. Insertion
//! order plays no part.

use super::replay::Trajectory;
use super::types::{Address, TokenScale};
use std::collections::BTreeMap;

/// Per-address raw balances at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
    balances: BTreeMap<Address, i128>,
    scale: TokenScale,
    /// Cutoff used for extraction, `None` for last-seen
    as_of: Option<i64>,
}

impl BalanceSnapshot {
    pub fn from_balances<I>(balances: I, scale: TokenScale) -> Self
    where
        I: IntoIterator<Item = (Address, i128)>,
    {
        Self {
            balances: balances.into_iter().collect(),
            scale,
            as_of: None,
        }
    }

    pub fn get(&self, address: &Address) -> Option<i128> {
        self.balances.get(address).copied()
    }

    /// Balance in decimal token units
    pub fn units(&self, address: &Address) -> Option<f64> {
        self.get(address).map(|raw| self.scale.to_units(raw))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, i128)> {
        self.balances.iter().map(|(a, b)| (a, *b))
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.balances.keys()
    }

    pub fn scale(&self) -> TokenScale {
        self.scale
    }

    pub fn as_of(&self) -> Option<i64> {
        self.as_of
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Entries sorted by balance descending, address ascending on ties
    pub fn ranked(&self) -> Vec<(&Address, i128)> {
        let mut ranked: Vec<(&Address, i128)> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// Each address's balance at its last-seen timestamp
pub fn last_balances(trajectory: &Trajectory, scale: TokenScale) -> BalanceSnapshot {
    select(trajectory, None, scale)
}

/// Each address's balance as of `cutoff` (inclusive)
///
/// Addresses with no point at or before `cutoff` are absent.
pub fn balances_at(trajectory: &Trajectory, cutoff: i64, scale: TokenScale) -> BalanceSnapshot {
    select(trajectory, Some(cutoff), scale)
}

fn select(trajectory: &Trajectory, cutoff: Option<i64>, scale: TokenScale) -> BalanceSnapshot {
    let mut best: BTreeMap<Address, (i64, i128)> = BTreeMap::new();

    for point in trajectory.points() {
        if cutoff.is_some_and(|c| point.timestamp > c) {
            continue;
        }
        let candidate = (point.timestamp, point.balance_after);
        best.entry(point.address.clone())
            .and_modify(|current| {
                if candidate > *current {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }

    BalanceSnapshot {
        balances: best.into_iter().map(|(a, (_, b))| (a, b)).collect(),
        scale,
        as_of: cutoff,
    }
}
