//! Attribution Runtime - one batch run of the holder attribution pipeline
//!
//! Usage:
//!   cargo run --release --bin attribution_runtime
//!
//! Environment variables (also read from `.env`):
//!   TRANSFERS_CSV_PATH - transfer table (required)
//!   LIQUIDITY_CSV_PATH - liquidity mint/burn table (optional)
//!   LABEL_DB_PATH - SQLite label cache (default: data/wallet_labels.db)
//!   RPC_URL - JSON-RPC endpoint for eth_getCode (default: http://127.0.0.1:8545)
//!   OUTPUT_DIR - report directory (default: output)
//!   CUTOFF_DAY - inclusive last day, YYYY-MM-DD (optional)
//!   POOL_ADDRESSES - comma-separated pool contracts (optional)
//!   CLASSIFY_FALLBACK - strict | eoa (default: strict)
//!   RUST_LOG - log filter (default: info)
//!
//! See `PipelineConfig::from_env` for the full list.

use dotenv::dotenv;
use holdflow::pipeline::{PipelineConfig, PipelineEngine, RunSummary};
use log::{error, info, warn};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Attribution Runtime");

    match run().await {
        Ok(summary) => {
            report(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ Attribution run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> holdflow::Result<RunSummary> {
    let config = PipelineConfig::from_env()?;

    info!("✅ Configuration loaded");
    info!("   ├─ Transfers: {}", config.transfers_path.display());
    if let Some(path) = &config.liquidity_path {
        info!("   ├─ Liquidity: {}", path.display());
    }
    info!("   ├─ Label DB: {}", config.label_db_path.display());
    info!("   ├─ RPC: {}", config.rpc_url);
    info!("   ├─ Output: {}", config.output_dir.display());
    if let Some(day) = config.cutoff_day {
        info!("   ├─ Cutoff day: {}", day.format("%Y-%m-%d"));
    }
    info!(
        "   ├─ Oracle: {}ms delay, concurrency {}, fallback {:?}",
        config.classifier.call_delay.as_millis(),
        config.classifier.concurrency,
        config.classifier.fallback
    );
    info!(
        "   └─ Attribution: max {} iterations, epsilon {} raw",
        config.attribution.max_iterations, config.attribution.epsilon
    );

    PipelineEngine::new(config)?.run().await
}

fn report(summary: &RunSummary) {
    info!("📊 Run summary");
    info!(
        "   ├─ Events: {} ({} rejected rows, {} duplicates)",
        summary.events, summary.rejected_rows, summary.duplicates
    );
    info!(
        "   ├─ Addresses: {} ({} contracts, {} unclassified)",
        summary.addresses, summary.contracts, summary.unclassified
    );
    info!(
        "   ├─ Labels: {} cache hits, {} oracle calls, {} saved",
        summary.cache_hits, summary.oracle_calls, summary.labels_saved
    );
    info!("   ├─ Attribution iterations: {}", summary.iterations);
    info!("   └─ Reports: {}", summary.reports.len());

    if let Some(incomplete) = &summary.incomplete {
        warn!("⚠️  {}", incomplete);
    }
    if !summary.unattributed.is_empty() {
        warn!("⚠️  {} contract(s) kept value with no depositors:", summary.unattributed.len());
        for (i, (contract, raw)) in summary.unattributed.iter().enumerate() {
            let branch = if i + 1 == summary.unattributed.len() { "└─" } else { "├─" };
            warn!("   {} {}: {} raw", branch, contract, raw);
        }
    }
    for (pool, e) in &summary.pool_errors {
        warn!("⚠️  No share report for {}: {}", pool, e);
    }
}
