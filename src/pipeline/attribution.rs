//! Attribution Engine: push contract-held value down to its depositors
//!
//! Bounded fixpoint over the contract graph. Each round:
//! 1. Pick contracts not yet processed
//! 2. For each contract `C` with custody `B_C` (direct + attributed balance),
//!    replay `C`'s deposit ledger and split `B_C` across counter-parties with
//!    a positive net deposit, pro rata. `C`'s custody drops to zero.
//! 3. Sum the round's shares per address and credit them
//! 4. A contract that receives value is re-queued, so the value keeps moving
//!    along contract→contract chains in later rounds
//!
//! The loop stops when nothing is pending or at `max_iterations`. Stopping at
//! the cap is not an error: the outcome carries an [`AttributionIncomplete`]
//! with the residual custody.
//!
//! Shares are computed in 256-bit fixed point and the rounding remainder goes
//! to the largest claimant, so a contract's shares always sum to exactly `B_C`.
//! Sums that leave the `i128` range end the run with `Overflow`.

use super::events::TransferSet;
use super::replay::replay_deposit_positions;
use super::shares::proportional;
use super::snapshot::BalanceSnapshot;
use super::types::{Address, AttributionRecord, TokenScale, WalletType};
use crate::error::{AttributionError, AttributionIncomplete, Result};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
pub struct AttributionConfig {
    pub max_iterations: usize,
    /// Custody below this many raw units is not worth distributing
    pub epsilon: i128,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            epsilon: 1_000_000,
        }
    }
}

/// Per-address ownership state; `wallet_type` is `None` when unclassified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipEntry {
    pub last_balance: i128,
    pub attributed_balance: i128,
    pub wallet_type: Option<WalletType>,
}

impl OwnershipEntry {
    pub fn total_balance(&self) -> i128 {
        self.last_balance + self.attributed_balance
    }

    fn is_contract(&self) -> bool {
        self.wallet_type == Some(WalletType::Contract)
    }
}

#[derive(Debug, Clone)]
pub struct AttributionOutcome {
    pub entries: BTreeMap<Address, OwnershipEntry>,
    /// Every share handed out, in round order
    pub records: Vec<AttributionRecord>,
    /// Rounds that distributed (or tried to distribute) value
    pub iterations: usize,
    /// Contracts processed but left holding value (no depositor history)
    pub unattributed: Vec<(Address, i128)>,
    /// Set when the iteration cap was hit with contracts still pending
    pub incomplete: Option<AttributionIncomplete>,
    pub scale: TokenScale,
}

impl AttributionOutcome {
    pub fn get(&self, address: &Address) -> Option<&OwnershipEntry> {
        self.entries.get(address)
    }

    pub fn total_balance(&self, address: &Address) -> i128 {
        self.entries
            .get(address)
            .map(OwnershipEntry::total_balance)
            .unwrap_or(0)
    }

    pub fn converged(&self) -> bool {
        self.incomplete.is_none()
    }

    /// Entries ordered by total balance descending
    pub fn ranked(&self) -> Vec<(&Address, &OwnershipEntry)> {
        let mut ranked: Vec<_> = self.entries.iter().collect();
        ranked.sort_by(|a, b| {
            b.1.total_balance()
                .cmp(&a.1.total_balance())
                .then_with(|| a.0.cmp(b.0))
        });
        ranked
    }
}

pub struct AttributionEngine<'a> {
    events: &'a TransferSet,
    labels: &'a BTreeMap<Address, WalletType>,
    config: AttributionConfig,
}

impl<'a> AttributionEngine<'a> {
    pub fn new(
        events: &'a TransferSet,
        labels: &'a BTreeMap<Address, WalletType>,
        config: AttributionConfig,
    ) -> Self {
        Self {
            events,
            labels,
            config,
        }
    }

    pub fn run(&self, snapshot: &BalanceSnapshot) -> Result<AttributionOutcome> {
        let mut result: BTreeMap<Address, OwnershipEntry> = snapshot
            .iter()
            .map(|(address, balance)| {
                (
                    address.clone(),
                    OwnershipEntry {
                        last_balance: balance,
                        attributed_balance: 0,
                        wallet_type: self.labels.get(address).copied(),
                    },
                )
            })
            .collect();

        let mut processed: HashSet<Address> = HashSet::new();
        let mut records = Vec::new();
        let mut iterations = 0;

        loop {
            let pending = pending_contracts(&result, &processed);
            if pending.is_empty() {
                break;
            }
            if iterations == self.config.max_iterations {
                break;
            }
            iterations += 1;

            let mut round = Vec::new();
            for contract in &pending {
                processed.insert(contract.clone());
                let Some(entry) = result.get_mut(contract) else { continue };
                let custody = entry.total_balance();

                if custody < 0 {
                    log::debug!("Contract {} has negative custody {}, not distributed", contract, custody);
                    continue;
                }
                if custody < self.config.epsilon {
                    continue;
                }

                let shares = self.distribute(contract, custody)?;
                if shares.is_empty() {
                    log::debug!("Contract {} has no depositors to attribute to", contract);
                    continue;
                }

                entry.last_balance = 0;
                entry.attributed_balance = 0;
                round.extend(shares);
            }

            let mut aggregated: BTreeMap<Address, i128> = BTreeMap::new();
            for record in &round {
                let sum = aggregated.entry(record.address.clone()).or_insert(0);
                *sum = sum
                    .checked_add(record.attributed_balance)
                    .ok_or_else(|| overflow(&record.address))?;
            }

            for (address, amount) in aggregated {
                let entry = result.entry(address.clone()).or_insert_with(|| OwnershipEntry {
                    last_balance: 0,
                    attributed_balance: 0,
                    wallet_type: self.labels.get(&address).copied(),
                });
                let attributed = entry
                    .attributed_balance
                    .checked_add(amount)
                    .filter(|a| entry.last_balance.checked_add(*a).is_some())
                    .ok_or_else(|| overflow(&address))?;
                entry.attributed_balance = attributed;

                if entry.is_contract() && amount >= self.config.epsilon {
                    processed.remove(&address);
                }
            }

            log::info!(
                "🔁 Attribution round {}: {} contract(s) considered, {} share(s) assigned",
                iterations,
                pending.len(),
                round.len()
            );
            records.extend(round);
        }

        let residual: Vec<(String, i128)> = pending_contracts(&result, &processed)
            .into_iter()
            .filter_map(|c| {
                let custody = result.get(&c).map(OwnershipEntry::total_balance).unwrap_or(0);
                (custody >= self.config.epsilon).then(|| (c.to_string(), custody))
            })
            .collect();

        let incomplete = if residual.is_empty() {
            None
        } else {
            let warning = AttributionIncomplete { iterations, residual };
            log::warn!("⚠️  {}", warning);
            Some(warning)
        };

        let unattributed = result
            .iter()
            .filter(|(a, e)| e.is_contract() && processed.contains(*a) && e.total_balance() >= self.config.epsilon)
            .map(|(a, e)| (a.clone(), e.total_balance()))
            .collect();

        Ok(AttributionOutcome {
            entries: result,
            records,
            iterations,
            unattributed,
            incomplete,
            scale: snapshot.scale(),
        })
    }

    /// Split `custody` across `contract`'s net depositors
    fn distribute(&self, contract: &Address, custody: i128) -> Result<Vec<AttributionRecord>> {
        let ledger = replay_deposit_positions(self.events, contract)?;

        let mut claimants: Vec<(&Address, i128)> = ledger
            .final_balances()
            .iter()
            .filter(|(_, balance)| **balance > 0)
            .map(|(a, b)| (a, *b))
            .collect();

        let total_positive = claimants
            .iter()
            .try_fold(0i128, |acc, (_, b)| acc.checked_add(*b))
            .ok_or_else(|| overflow(contract))?;
        if total_positive <= 0 {
            return Ok(Vec::new());
        }

        // Largest claimant first; it absorbs the rounding remainder
        claimants.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut shares = claimants
            .iter()
            .map(|(_, balance)| {
                proportional(custody, *balance, total_positive).ok_or_else(|| overflow(contract))
            })
            .collect::<Result<Vec<i128>>>()?;
        // shares are truncated pro-rata parts, so their sum never exceeds `custody`
        let assigned: i128 = shares.iter().sum();
        shares[0] += custody - assigned;

        Ok(claimants
            .into_iter()
            .zip(shares)
            .filter(|(_, share)| *share != 0)
            .map(|((address, _), share)| AttributionRecord {
                address: address.clone(),
                source_contract: contract.clone(),
                attributed_balance: share,
            })
            .collect())
    }
}

fn overflow(address: &Address) -> AttributionError {
    AttributionError::Overflow(format!("attributed balance of {}", address))
}

fn pending_contracts(
    result: &BTreeMap<Address, OwnershipEntry>,
    processed: &HashSet<Address>,
) -> Vec<Address> {
    result
        .iter()
        .filter(|(address, entry)| entry.is_contract() && !processed.contains(*address))
        .map(|(address, _)| address.clone())
        .collect()
}
