//! # Holder Attribution Pipeline
//!
//! Reconstructs token balances from a transfer log and pushes balances held
//! by contracts (pools, vaults) back to the accounts that funded them.
//!
//! ## Stages
//!
//! 1. `ingestion` / `events` - CSV rows → deduplicated `EventSet`
//! 2. `replay` - event fold → per-address balance trajectories
//! 3. `snapshot` - trajectory → last (or as-of) balance per address
//! 4. `classifier` - EOA vs. contract labels via `oracle`, cached in
//!    `labels` and persisted by `db`
//! 5. `attribution` - bounded fixpoint redistributing contract custody
//! 6. `shares` - positions → fractions of a pool
//! 7. `report` - CSV output
//!
//! `engine::PipelineEngine` runs the stages in order from a `PipelineConfig`.
//!
//! ## Amounts
//!
//! All balances are raw `i128` smallest units inside the pipeline. Decimal
//! token units (`f64`) only appear through `TokenScale` when reporting.

pub mod attribution;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engine;
pub mod events;
pub mod ingestion;
pub mod labels;
pub mod oracle;
pub mod replay;
pub mod report;
pub mod shares;
pub mod snapshot;
pub mod types;

// Re-export commonly used types
pub use attribution::{AttributionConfig, AttributionEngine, AttributionOutcome, OwnershipEntry};
pub use classifier::{Classification, ClassifierConfig, FallbackPolicy, RateLimiter, WalletClassifier};
pub use config::PipelineConfig;
pub use db::SqliteLabelStore;
pub use engine::{PipelineEngine, RunSummary};
pub use events::{EventSet, LiquiditySet, LoadOutcome, TransferSet};
pub use labels::LabelCache;
pub use oracle::{ContractOracle, RpcContractOracle};
pub use replay::{
    replay, replay_deposit_positions, replay_holder_flows, replay_liquidity, replay_pool_positions,
    BalancePoint, ReplayState, Trajectory,
};
pub use shares::{pool_total, share_of, PoolShare};
pub use snapshot::{balances_at, last_balances, BalanceSnapshot};
pub use types::{
    Address, AttributionRecord, LegPolicy, LiquidityEvent, LiquidityKind, TokenScale,
    TransferEvent, WalletLabel, WalletType,
};
