//! Pipeline configuration from environment variables
//!
//! Every variable has a default except `TRANSFERS_CSV_PATH`. A variable that
//! is set but does not parse is a configuration error, never a silent default.

use super::attribution::AttributionConfig;
use super::classifier::{ClassifierConfig, FallbackPolicy};
use super::types::{Address, LegPolicy, TokenScale};
use crate::error::{AttributionError, Result};
use chrono::{FixedOffset, NaiveDate};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for one attribution run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Transfer event table (CSV)
    pub transfers_path: PathBuf,

    /// Optional liquidity mint/burn table (CSV)
    pub liquidity_path: Option<PathBuf>,

    /// SQLite file holding cached wallet labels
    pub label_db_path: PathBuf,

    /// JSON-RPC endpoint for `eth_getCode`
    pub rpc_url: String,

    /// Directory receiving the CSV reports
    pub output_dir: PathBuf,

    /// Inclusive last calendar day of events to replay
    pub cutoff_day: Option<NaiveDate>,

    /// Timezone in which calendar days are bucketed
    pub reference_offset: FixedOffset,

    pub token_scale: TokenScale,
    pub attribution: AttributionConfig,
    pub classifier: ClassifierConfig,
    pub oracle_timeout: Duration,

    /// Pool contracts whose depositor shares are reported
    pub pools: Vec<Address>,
    pub leg_policy: LegPolicy,

    /// Decimals of the two liquidity legs
    pub leg_scales: (TokenScale, TokenScale),
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `TRANSFERS_CSV_PATH` (required)
    /// - `LIQUIDITY_CSV_PATH` (optional)
    /// - `LABEL_DB_PATH` (default: data/wallet_labels.db)
    /// - `RPC_URL` (default: http://127.0.0.1:8545)
    /// - `OUTPUT_DIR` (default: output)
    /// - `CUTOFF_DAY` (optional, YYYY-MM-DD)
    /// - `REFERENCE_UTC_OFFSET_SECS` (default: 0)
    /// - `TOKEN_DECIMALS` (default: 18)
    /// - `MAX_ATTRIBUTION_ITERATIONS` (default: 3)
    /// - `ATTRIBUTION_EPSILON_RAW` (default: 1000000)
    /// - `ORACLE_CALL_DELAY_MS` (default: 200)
    /// - `ORACLE_CONCURRENCY` (default: 1)
    /// - `ORACLE_TIMEOUT_SECS` (default: 10)
    /// - `CLASSIFY_FALLBACK` (default: strict; or eoa)
    /// - `POOL_ADDRESSES` (optional, comma-separated)
    /// - `POOL_LEG_POLICY` (default: token0; or token1, sum)
    /// - `POOL_LEG0_DECIMALS` / `POOL_LEG1_DECIMALS` (default: 18 / 6)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Scale in which liquidity positions are expressed under `leg_policy`
    pub fn liquidity_scale(&self) -> TokenScale {
        match self.leg_policy {
            LegPolicy::Token1 => self.leg_scales.1,
            LegPolicy::Token0 | LegPolicy::ScaledSum { .. } => self.leg_scales.0,
        }
    }

    /// Same as [`from_env`](Self::from_env) against an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let transfers_path = get("TRANSFERS_CSV_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| AttributionError::Config("TRANSFERS_CSV_PATH must be set".into()))?;

        let cutoff_day = get("CUTOFF_DAY")
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| invalid("CUTOFF_DAY", &raw))
            })
            .transpose()?;

        let offset_secs: i32 = parse_or(&get, "REFERENCE_UTC_OFFSET_SECS", 0)?;
        let reference_offset = FixedOffset::east_opt(offset_secs)
            .ok_or_else(|| invalid("REFERENCE_UTC_OFFSET_SECS", &offset_secs.to_string()))?;

        let token_scale = TokenScale::new(parse_or(&get, "TOKEN_DECIMALS", 18)?)?;

        let defaults = AttributionConfig::default();
        let attribution = AttributionConfig {
            max_iterations: parse_or(&get, "MAX_ATTRIBUTION_ITERATIONS", defaults.max_iterations)?,
            epsilon: parse_or(&get, "ATTRIBUTION_EPSILON_RAW", defaults.epsilon)?,
        };

        let concurrency: usize = parse_or(&get, "ORACLE_CONCURRENCY", 1)?;
        if concurrency == 0 {
            return Err(invalid("ORACLE_CONCURRENCY", "0"));
        }
        let classifier = ClassifierConfig {
            call_delay: Duration::from_millis(parse_or(&get, "ORACLE_CALL_DELAY_MS", 200)?),
            concurrency,
            fallback: get("CLASSIFY_FALLBACK")
                .map(|raw| raw.parse::<FallbackPolicy>())
                .transpose()?
                .unwrap_or(FallbackPolicy::Strict),
        };

        let pools = get("POOL_ADDRESSES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(Address::parse)
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let leg0 = TokenScale::new(parse_or(&get, "POOL_LEG0_DECIMALS", 18)?)?;
        let leg1 = TokenScale::new(parse_or(&get, "POOL_LEG1_DECIMALS", 6)?)?;
        let leg_policy = match get("POOL_LEG_POLICY")
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            None | Some("token0") => LegPolicy::Token0,
            Some("token1") => LegPolicy::Token1,
            Some("sum") => LegPolicy::ScaledSum { leg0, leg1 },
            Some(other) => return Err(invalid("POOL_LEG_POLICY", other)),
        };

        Ok(Self {
            transfers_path,
            liquidity_path: get("LIQUIDITY_CSV_PATH").map(PathBuf::from),
            label_db_path: get("LABEL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/wallet_labels.db")),
            rpc_url: get("RPC_URL").unwrap_or_else(|| "http://127.0.0.1:8545".to_string()),
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("output")),
            cutoff_day,
            reference_offset,
            token_scale,
            attribution,
            classifier,
            oracle_timeout: Duration::from_secs(parse_or(&get, "ORACLE_TIMEOUT_SECS", 10)?),
            pools,
            leg_policy,
            leg_scales: (leg0, leg1),
        })
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| invalid(key, &raw)),
        None => Ok(default),
    }
}

fn invalid(key: &str, value: &str) -> AttributionError {
    AttributionError::Config(format!("{} has invalid value `{}`", key, value))
}
