//! Pool Share Calculator
//!
//! Normalizes a set of positions into ownership fractions of a pool.
//! Only strictly positive positions count toward `pool_total`.

use super::snapshot::BalanceSnapshot;
use super::types::Address;
use crate::error::{AttributionError, Result};
use alloy_primitives::U256;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct PoolShare {
    /// Fraction of the pool in `[0, 1]`
    pub percentage_of_pool: f64,
    /// `reserve * balance / pool_total`, in token units
    pub token_equivalent: f64,
}

/// Each positive holder's share of `reserve` (raw units)
///
/// Pass the pool total itself as `reserve` to get each holder's own balance
/// back as `token_equivalent`.
pub fn share_of(snapshot: &BalanceSnapshot, reserve: i128) -> Result<BTreeMap<Address, PoolShare>> {
    let pool_total = pool_total(snapshot)?;
    if pool_total == 0 {
        return Err(AttributionError::EmptyPool);
    }

    let scale = snapshot.scale();
    snapshot
        .iter()
        .filter(|(_, balance)| *balance > 0)
        .map(|(address, balance)| {
            let equivalent = proportional(reserve, balance, pool_total)
                .ok_or_else(|| AttributionError::Overflow(format!("pool share of {}", address)))?;
            Ok((
                address.clone(),
                PoolShare {
                    percentage_of_pool: balance as f64 / pool_total as f64,
                    token_equivalent: scale.to_units(equivalent),
                },
            ))
        })
        .collect()
}

/// Sum of strictly positive positions (raw units)
pub fn pool_total(snapshot: &BalanceSnapshot) -> Result<i128> {
    snapshot
        .iter()
        .map(|(_, b)| b)
        .filter(|b| *b > 0)
        .try_fold(0i128, |acc, b| acc.checked_add(b))
        .ok_or_else(|| AttributionError::Overflow("pool total".to_string()))
}

/// `amount * part / whole`, truncated toward zero
///
/// Requires `0 < part <= whole`, which bounds the result by `|amount|`.
/// `None` only for `amount == i128::MIN` with `part == whole`.
pub(crate) fn proportional(amount: i128, part: i128, whole: i128) -> Option<i128> {
    let product = U256::from(amount.unsigned_abs()) * U256::from(part as u128);
    let share = i128::try_from((product / U256::from(whole as u128)).to::<u128>()).ok()?;
    if amount < 0 {
        share.checked_neg()
    } else {
        Some(share)
    }
}
