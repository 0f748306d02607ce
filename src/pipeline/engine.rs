//! Pipeline Engine - one end-to-end attribution run
//!
//! ```text
//! transfers.csv ──► TransferSet (dedup, cutoff)
//!                      │
//!                      ▼
//!                   replay ──► running_balances.csv
//!                      │
//!                      ▼
//!                 last_balances ──► WalletClassifier ◄──► SqliteLabelStore
//!                      │                   │
//!                      ▼                   ▼
//!                 AttributionEngine ◄── labels
//!                      │
//!                      ├──► ownership_snapshot.csv
//!                      └──► attribution_records.csv
//!
//! POOL_ADDRESSES  ──► replay_deposit_positions ──► pool_shares_<pool>.csv
//!                 └─► replay_pool_positions    ──► pool_positions.csv
//!                                              └─► pool_shares_all.csv (2+ pools)
//! liquidity.csv   ──► replay_liquidity         ──► liquidity_shares.csv
//! ```
//!
//! The label store is loaded once before classification and saved once after.

use super::attribution::{AttributionEngine, AttributionOutcome};
use super::classifier::WalletClassifier;
use super::config::PipelineConfig;
use super::db::SqliteLabelStore;
use super::events::{EventSet, LiquiditySet, Timestamped, TransferSet};
use super::ingestion::{load_liquidity, load_transfers};
use super::oracle::{ContractOracle, RpcContractOracle};
use super::replay::{replay, replay_deposit_positions, replay_liquidity, replay_pool_positions};
use super::report::{
    write_attributions, write_file, write_ownership, write_pool_positions, write_pool_shares,
    write_running_balances,
};
use super::shares::{pool_total, share_of};
use super::snapshot::{last_balances, BalanceSnapshot};
use super::types::Address;
use crate::error::{AttributionError, AttributionIncomplete, Result};
use std::collections::HashSet;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What one run did, for logging and tests
#[derive(Debug, Default)]
pub struct RunSummary {
    pub events: usize,
    pub rejected_rows: usize,
    pub duplicates: usize,
    pub addresses: usize,
    pub contracts: usize,
    pub unclassified: usize,
    pub cache_hits: usize,
    pub oracle_calls: usize,
    pub labels_saved: usize,
    pub iterations: usize,
    pub incomplete: Option<AttributionIncomplete>,
    /// Contracts left holding value because nobody deposited into them
    pub unattributed: Vec<(Address, i128)>,
    /// Every CSV file written
    pub reports: Vec<PathBuf>,
    /// Pools whose share report could not be produced
    pub pool_errors: Vec<(String, AttributionError)>,
}

impl RunSummary {
    fn record_attribution(&mut self, outcome: &AttributionOutcome) {
        self.iterations = outcome.iterations;
        self.incomplete = outcome.incomplete.clone();
        self.unattributed = outcome.unattributed.clone();
        for (contract, custody) in &self.unattributed {
            log::warn!(
                "⚠️  Contract {} keeps {:.4} tokens: no depositors to attribute to",
                contract,
                outcome.scale.to_units(*custody)
            );
        }
    }
}

pub struct PipelineEngine {
    config: PipelineConfig,
    oracle: Arc<dyn ContractOracle>,
}

impl PipelineEngine {
    /// Engine backed by the JSON-RPC oracle at `config.rpc_url`
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let oracle = RpcContractOracle::new(config.rpc_url.clone(), config.oracle_timeout)?;
        Ok(Self::with_oracle(config, Arc::new(oracle)))
    }

    /// Engine with a caller-supplied oracle
    pub fn with_oracle(config: PipelineConfig, oracle: Arc<dyn ContractOracle>) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let config = &self.config;
        let mut summary = RunSummary::default();

        // 1. Event store
        let loaded = load_transfers(&config.transfers_path)?;
        summary.rejected_rows = loaded.rejected.len();
        summary.duplicates = loaded.duplicates;
        let events = self.apply_cutoff(loaded.events);
        summary.events = events.len();

        let addresses = events.addresses();
        if addresses.is_empty() {
            return Err(AttributionError::NoAddresses);
        }
        summary.addresses = addresses.len();

        // 2. Replay and snapshot
        log::info!("🔁 Replaying {} transfers across {} addresses", events.len(), addresses.len());
        let trajectory = replay(&events)?;
        let snapshot = last_balances(&trajectory, config.token_scale);
        summary.reports.push(self.write_report("running_balances.csv", |f| {
            write_running_balances(&trajectory, config.token_scale, f)
        })?);

        // 3. Classification
        let mut store = SqliteLabelStore::open(&config.label_db_path)?;
        let mut cache = store.load()?;

        let classifier = WalletClassifier::new(self.oracle.clone(), config.classifier.clone());
        let classification = classifier.classify(&addresses, &mut cache).await;
        summary.labels_saved = store.save(&mut cache)?;
        summary.contracts = classification.contracts().count();
        summary.unclassified = classification.unavailable.len();
        summary.cache_hits = classification.cache_hits;
        summary.oracle_calls = classification.oracle_calls;
        log::info!(
            "   └─ {} contracts, {} unclassified, {} oracle calls, {} new labels saved",
            summary.contracts,
            summary.unclassified,
            summary.oracle_calls,
            summary.labels_saved
        );

        // 4. Attribution
        let outcome = AttributionEngine::new(&events, &classification.labels, config.attribution.clone())
            .run(&snapshot)?;
        summary.record_attribution(&outcome);
        self.write_attribution_reports(&outcome, &mut summary)?;

        // 5. Pool shares
        for pool in &config.pools {
            self.report_pool(&events, &snapshot, pool, &mut summary)?;
        }
        if !config.pools.is_empty() {
            self.report_pool_set(&events, &snapshot, &mut summary)?;
        }
        if let Some(path) = &config.liquidity_path {
            self.report_liquidity(path, &mut summary)?;
        }

        log::info!(
            "✅ Attribution run complete: {} addresses, {} iterations, {} reports",
            outcome.entries.len(),
            summary.iterations,
            summary.reports.len()
        );
        Ok(summary)
    }

    fn apply_cutoff<E>(&self, events: EventSet<E>) -> EventSet<E>
    where
        E: Timestamped + Clone + Eq + Hash,
    {
        match self.config.cutoff_day {
            Some(day) => {
                let filtered = events.up_to_day(day, self.config.reference_offset);
                log::info!(
                    "📅 Cutoff {}: kept {} of {} events",
                    day.format("%Y-%m-%d"),
                    filtered.len(),
                    events.len()
                );
                filtered
            }
            None => events,
        }
    }

    fn write_report<F>(&self, name: &str, write: F) -> Result<PathBuf>
    where
        F: FnOnce(std::fs::File) -> Result<usize>,
    {
        let path = self.config.output_dir.join(name);
        write_file(&path, write)?;
        Ok(path)
    }

    fn write_attribution_reports(
        &self,
        outcome: &AttributionOutcome,
        summary: &mut RunSummary,
    ) -> Result<()> {
        summary
            .reports
            .push(self.write_report("ownership_snapshot.csv", |f| write_ownership(outcome, f))?);
        summary
            .reports
            .push(self.write_report("attribution_records.csv", |f| write_attributions(outcome, f))?);
        Ok(())
    }

    /// Depositor shares of one pool, valued against the pool's own balance
    fn report_pool(
        &self,
        events: &TransferSet,
        snapshot: &BalanceSnapshot,
        pool: &Address,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let positions = last_balances(&replay_deposit_positions(events, pool)?, self.config.token_scale);
        let reserve = snapshot.get(pool).unwrap_or(0);
        self.report_shares(&pool.to_string(), &positions, reserve, &format!("pool_shares_{}.csv", pool), summary)
    }

    /// Net positions against every configured pool at once
    ///
    /// The raw positions are always written. With two or more pools they are
    /// also valued as shares of the pools' combined balance.
    fn report_pool_set(
        &self,
        events: &TransferSet,
        snapshot: &BalanceSnapshot,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let pools: HashSet<Address> = self.config.pools.iter().cloned().collect();
        let positions = last_balances(&replay_pool_positions(events, &pools)?, self.config.token_scale);
        summary
            .reports
            .push(self.write_report("pool_positions.csv", |f| write_pool_positions(&positions, f))?);

        if pools.len() < 2 {
            return Ok(());
        }
        let reserve = pools
            .iter()
            .filter_map(|p| snapshot.get(p))
            .try_fold(0i128, |acc, b| acc.checked_add(b))
            .ok_or_else(|| AttributionError::Overflow("combined pool balance".to_string()))?;
        self.report_shares("all pools", &positions, reserve, "pool_shares_all.csv", summary)
    }

    /// Provider shares from the liquidity mint/burn table
    fn report_liquidity(&self, path: &Path, summary: &mut RunSummary) -> Result<()> {
        let loaded = load_liquidity(path)?;
        summary.rejected_rows += loaded.rejected.len();
        let events: LiquiditySet = self.apply_cutoff(loaded.events);

        let positions = last_balances(
            &replay_liquidity(&events, self.config.leg_policy)?,
            self.config.liquidity_scale(),
        );
        let total = pool_total(&positions)?;
        self.report_shares("liquidity", &positions, total, "liquidity_shares.csv", summary)
    }

    /// Write one share report; an empty pool is recorded, not fatal
    fn report_shares(
        &self,
        label: &str,
        positions: &BalanceSnapshot,
        reserve: i128,
        file_name: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        match share_of(positions, reserve) {
            Ok(shares) => {
                log::info!(
                    "🏊 {}: {} holders, reserve {:.4}",
                    label,
                    shares.len(),
                    positions.scale().to_units(reserve)
                );
                summary
                    .reports
                    .push(self.write_report(file_name, |f| write_pool_shares(&shares, f))?);
                Ok(())
            }
            Err(e @ AttributionError::EmptyPool) => {
                log::warn!("⚠️  {}: {}", label, e);
                summary.pool_errors.push((label.to_string(), e));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
