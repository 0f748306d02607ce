//! Core data types shared by every pipeline stage
//!
//! Amounts stay in the token's smallest unit (`i128`) throughout the core.
//! Decimal token units only appear through [`TokenScale`] at the
//! snapshot/report boundary.

use crate::error::{AttributionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lower-case, `0x`-prefixed 20-byte hex address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_lowercase();
        let hex_part = normalized
            .strip_prefix("0x")
            .ok_or_else(|| AttributionError::InvalidAddress(raw.to_string()))?;

        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AttributionError::InvalidAddress(raw.to_string()));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// EIP-55 mixed-case rendering, required by the upstream oracle
    pub fn to_checksum(&self) -> Result<String> {
        let parsed = alloy_primitives::Address::from_str(&self.0)
            .map_err(|_| AttributionError::InvalidAddress(self.0.clone()))?;
        Ok(parsed.to_checksum(None))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AttributionError;

    fn try_from(value: String) -> Result<Self> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// Decimal scale of a token (10^decimals smallest units per token)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenScale {
    decimals: u32,
}

impl TokenScale {
    /// 38 is the largest power of ten representable in `i128`
    pub fn new(decimals: u32) -> Result<Self> {
        if decimals > 38 {
            return Err(AttributionError::Config(format!(
                "token decimals {} exceed the supported maximum of 38",
                decimals
            )));
        }
        Ok(Self { decimals })
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn factor(&self) -> i128 {
        10i128.pow(self.decimals)
    }

    /// Convert raw smallest units to decimal token units
    pub fn to_units(&self, raw: i128) -> f64 {
        let factor = self.factor();
        let whole = (raw / factor) as f64;
        let frac = (raw % factor) as f64 / factor as f64;
        whole + frac
    }

    /// Re-express a raw amount of this scale in `target` smallest units
    ///
    /// Scaling down truncates toward zero. `None` when scaling up overflows.
    pub fn rescale(&self, raw: i128, target: TokenScale) -> Option<i128> {
        if target.decimals >= self.decimals {
            raw.checked_mul(10i128.pow(target.decimals - self.decimals))
        } else {
            Some(raw / 10i128.pow(self.decimals - target.decimals))
        }
    }
}

impl Default for TokenScale {
    fn default() -> Self {
        Self { decimals: 18 }
    }
}

/// A single token transfer log entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferEvent {
    pub block_number: u64,
    pub timestamp: i64,
    pub tx_hash: String,
    pub from_address: Address,
    pub to_address: Address,
    pub amount: i128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityKind {
    Mint,
    Burn,
}

impl LiquidityKind {
    /// Position delta sign: mint adds, burn removes
    pub fn sign(&self) -> i128 {
        match self {
            LiquidityKind::Mint => 1,
            LiquidityKind::Burn => -1,
        }
    }
}

impl FromStr for LiquidityKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.trim().to_lowercase().as_str() {
            "mint" => Ok(LiquidityKind::Mint),
            "burn" => Ok(LiquidityKind::Burn),
            _ => Err(()),
        }
    }
}

/// Two-legged liquidity add/remove event on a pool contract
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiquidityEvent {
    pub timestamp: i64,
    pub tx_hash: String,
    pub address: Address,
    pub amount0: i128,
    pub amount1: i128,
    pub event_type: LiquidityKind,
}

/// How a two-legged liquidity event collapses into one effective amount
///
/// Pinned per pool type; there is no inferred default per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegPolicy {
    /// Only leg 0 counts (single-sided tracked token in leg 0)
    Token0,
    /// Only leg 1 counts
    Token1,
    /// Both legs rescaled to `leg0`'s scale and summed (stable/stable pools)
    ScaledSum { leg0: TokenScale, leg1: TokenScale },
}

impl LegPolicy {
    /// `None` when the combined amount leaves the `i128` range
    pub fn effective_amount(&self, event: &LiquidityEvent) -> Option<i128> {
        match self {
            LegPolicy::Token0 => Some(event.amount0),
            LegPolicy::Token1 => Some(event.amount1),
            LegPolicy::ScaledSum { leg0, leg1 } => leg1
                .rescale(event.amount1, *leg0)
                .and_then(|leg| event.amount0.checked_add(leg)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletType {
    #[serde(rename = "EOA")]
    Eoa,
    Contract,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Eoa => "EOA",
            WalletType::Contract => "Contract",
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletType {
    type Err = AttributionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "EOA" | "eoa" => Ok(WalletType::Eoa),
            "Contract" | "contract" => Ok(WalletType::Contract),
            other => Err(AttributionError::Config(format!(
                "unknown wallet type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletLabel {
    pub address: Address,
    pub wallet_type: WalletType,
}

/// Value owned by `address` but custodied by `source_contract`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionRecord {
    pub address: Address,
    pub source_contract: Address,
    pub attributed_balance: i128,
}
