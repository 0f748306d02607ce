//! End-to-end tests for the attribution pipeline
//!
//! Each test writes a transfer CSV into a temp dir, runs `PipelineEngine`
//! against a mock contract oracle and a temp SQLite label store, then checks
//! the returned summary and the CSV reports.
//!
//! Scenario (amounts in whole tokens, 18 decimals):
//! - MINT sends 100 to U1 and 100 to U2
//! - U1 deposits 30 into POOL
//! - U2 deposits 70 into VAULT, VAULT deposits 70 into POOL
//!
//! POOL's 100 splits 30/70 between U1 and VAULT; VAULT's 70 then moves on to U2.

#[cfg(test)]
mod attribution_pipeline_tests {
    use async_trait::async_trait;
    use holdflow::pipeline::{Address, ContractOracle, PipelineConfig, PipelineEngine};
    use holdflow::{AttributionError, Result};
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const MINT: &str = "0x0000000000000000000000000000000000000001";
    const U1: &str = "0x00000000000000000000000000000000000000a1";
    const U2: &str = "0x00000000000000000000000000000000000000a2";
    const POOL: &str = "0x00000000000000000000000000000000000000c1";
    const VAULT: &str = "0x00000000000000000000000000000000000000c2";

    /// 2025-03-17 00:00:00 UTC
    const DAY: i64 = 1742169600;

    struct MockOracle {
        contracts: HashSet<String>,
        broken: HashSet<String>,
        calls: AtomicUsize,
    }

    impl MockOracle {
        fn new(contracts: &[&str], broken: &[&str]) -> Arc<Self> {
            let checksum = |s: &&str| Address::parse(s).unwrap().to_checksum().unwrap();
            Arc::new(Self {
                contracts: contracts.iter().map(checksum).collect(),
                broken: broken.iter().map(checksum).collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContractOracle for MockOracle {
        async fn is_contract(&self, checksummed: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken.contains(checksummed) {
                return Err(AttributionError::Oracle("timeout".to_string()));
            }
            Ok(self.contracts.contains(checksummed))
        }
    }

    fn transfer(block: u64, ts: i64, tx: &str, from: &str, to: &str, tokens: i128) -> String {
        format!(
            "{},{},{},{},{},{}\n",
            block,
            ts,
            tx,
            from,
            to,
            tokens * 1_000_000_000_000_000_000
        )
    }

    fn scenario_csv() -> String {
        let mut csv = String::from("block_number,timestamp,tx_hash,from_address,to_address,amount\n");
        csv += &transfer(1, DAY + 100, "0x01", MINT, U1, 100);
        csv += &transfer(1, DAY + 100, "0x02", MINT, U2, 100);
        // exact duplicate of the first row
        csv += &transfer(1, DAY + 100, "0x01", MINT, U1, 100);
        csv += &transfer(2, DAY + 200, "0x03", U1, POOL, 30);
        csv += &transfer(3, DAY + 300, "0x04", U2, VAULT, 70);
        csv += &transfer(4, DAY + 400, "0x05", VAULT, POOL, 70);
        csv += "5,not-a-time,0x06,0x00000000000000000000000000000000000000a1,0x00000000000000000000000000000000000000a2,1\n";
        // next calendar day
        csv += &transfer(6, DAY + 86_400, "0x07", MINT, U1, 500);
        csv
    }

    fn config(dir: &Path, transfers: &str, extra: &[(&str, &str)]) -> PipelineConfig {
        let csv_path = dir.join("transfers.csv");
        std::fs::write(&csv_path, transfers).unwrap();

        let mut vars: HashMap<String, String> = HashMap::new();
        vars.insert("TRANSFERS_CSV_PATH".into(), csv_path.display().to_string());
        vars.insert("LABEL_DB_PATH".into(), dir.join("labels.db").display().to_string());
        vars.insert("OUTPUT_DIR".into(), dir.join("out").display().to_string());
        vars.insert("ORACLE_CALL_DELAY_MS".into(), "0".into());
        vars.insert("CUTOFF_DAY".into(), "2025-03-17".into());
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        PipelineConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let text = std::fs::read_to_string(path).unwrap();
        text.lines()
            .skip(1)
            .map(|l| l.split(',').map(str::to_string).collect())
            .collect()
    }

    fn row_for<'a>(rows: &'a [Vec<String>], address: &str) -> &'a Vec<String> {
        rows.iter()
            .find(|r| r[0] == address)
            .unwrap_or_else(|| panic!("no row for {}", address))
    }

    #[tokio::test]
    async fn test_end_to_end_nested_attribution() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &scenario_csv(), &[("POOL_ADDRESSES", POOL)]);
        let out = config.output_dir.clone();
        let oracle = MockOracle::new(&[POOL, VAULT], &[]);

        let summary = PipelineEngine::with_oracle(config, oracle.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.events, 5, "duplicate and post-cutoff rows dropped");
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.rejected_rows, 1);
        assert_eq!(summary.addresses, 5);
        assert_eq!(summary.contracts, 2);
        assert_eq!(summary.oracle_calls, 5);
        assert_eq!(summary.labels_saved, 5);
        assert!(summary.incomplete.is_none());
        assert!(summary.pool_errors.is_empty());

        let ownership = read_rows(&out.join("ownership_snapshot.csv"));
        assert_eq!(ownership.len(), 5);
        assert_eq!(ownership[0], vec![U1, "70.0", "30.0", "100.0", "EOA"]);
        assert_eq!(ownership[1], vec![U2, "30.0", "70.0", "100.0", "EOA"]);
        assert_eq!(row_for(&ownership, POOL)[3], "0.0");
        assert_eq!(row_for(&ownership, VAULT)[3], "0.0");
        assert_eq!(row_for(&ownership, MINT)[3], "-200.0");

        let records = read_rows(&out.join("attribution_records.csv"));
        assert!(records.contains(&vec![U1.to_string(), POOL.to_string(), "30.0".to_string()]));
        assert!(records.contains(&vec![VAULT.to_string(), POOL.to_string(), "70.0".to_string()]));
        assert!(records.contains(&vec![U2.to_string(), VAULT.to_string(), "70.0".to_string()]));

        let shares = read_rows(&out.join(format!("pool_shares_{}.csv", POOL)));
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0], vec![VAULT, "0.7", "70.0"]);
        assert_eq!(shares[1], vec![U1, "0.3", "30.0"]);

        assert!(summary.unattributed.is_empty());

        let running = std::fs::read_to_string(out.join("running_balances.csv")).unwrap();
        let mut lines = running.lines();
        assert_eq!(lines.next(), Some("timestamp,block_number,tx_hash,address,balance_after"));
        assert_eq!(lines.next(), Some(format!("{},1,0x01,{},-100.0", DAY + 100, MINT).as_str()));

        let positions = read_rows(&out.join("pool_positions.csv"));
        assert_eq!(positions, vec![vec![VAULT, "70.0"], vec![U1, "30.0"]]);
    }

    #[tokio::test]
    async fn test_pool_set_skips_pool_to_pool_transfers() {
        let dir = tempfile::tempdir().unwrap();
        let pools = format!("{},{}", POOL, VAULT);
        let config = config(dir.path(), &scenario_csv(), &[("POOL_ADDRESSES", pools.as_str())]);
        let out = config.output_dir.clone();
        let oracle = MockOracle::new(&[POOL, VAULT], &[]);

        PipelineEngine::with_oracle(config, oracle).run().await.unwrap();

        let combined = read_rows(&out.join("pool_shares_all.csv"));
        assert_eq!(combined[0], vec![U2, "0.7", "70.0"]);
        assert_eq!(combined[1], vec![U1, "0.3", "30.0"]);

        // VAULT passed everything on to POOL, so its depositor holds nothing there
        let vault = read_rows(&out.join(format!("pool_shares_{}.csv", VAULT)));
        assert_eq!(vault, vec![vec![U2.to_string(), "1.0".to_string(), "0.0".to_string()]]);
    }

    #[tokio::test]
    async fn test_warm_label_cache_skips_oracle() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = MockOracle::new(&[POOL, VAULT], &[]);

        let first = PipelineEngine::with_oracle(config(dir.path(), &scenario_csv(), &[]), oracle.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(first.oracle_calls, 5);

        let second = PipelineEngine::with_oracle(config(dir.path(), &scenario_csv(), &[]), oracle.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(second.oracle_calls, 0);
        assert_eq!(second.cache_hits, 5);
        assert_eq!(second.labels_saved, 0);
        assert_eq!(oracle.calls(), 5);
    }

    #[tokio::test]
    async fn test_unclassified_contract_keeps_its_share() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &scenario_csv(), &[]);
        let out = config.output_dir.clone();
        let oracle = MockOracle::new(&[POOL, VAULT], &[VAULT]);

        let summary = PipelineEngine::with_oracle(config, oracle).run().await.unwrap();
        assert_eq!(summary.unclassified, 1);
        assert_eq!(summary.labels_saved, 4);

        let ownership = read_rows(&out.join("ownership_snapshot.csv"));
        assert_eq!(row_for(&ownership, VAULT)[1..], ["0.0", "70.0", "70.0", "unknown"]);
        assert_eq!(row_for(&ownership, U2)[3], "30.0");
    }

    #[tokio::test]
    async fn test_eoa_fallback_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &scenario_csv(), &[("CLASSIFY_FALLBACK", "eoa")]);
        let out = config.output_dir.clone();
        let oracle = MockOracle::new(&[POOL, VAULT], &[VAULT]);

        let summary = PipelineEngine::with_oracle(config, oracle).run().await.unwrap();
        assert_eq!(summary.unclassified, 0);
        assert_eq!(summary.labels_saved, 4);

        let ownership = read_rows(&out.join("ownership_snapshot.csv"));
        assert_eq!(row_for(&ownership, VAULT)[4], "EOA");
    }

    #[tokio::test]
    async fn test_empty_event_set_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let header = "block_number,timestamp,tx_hash,from_address,to_address,amount\n";
        let oracle = MockOracle::new(&[], &[]);

        let result = PipelineEngine::with_oracle(config(dir.path(), header, &[]), oracle.clone())
            .run()
            .await;
        assert!(matches!(result, Err(AttributionError::NoAddresses)));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_liquidity_shares_report() {
        let dir = tempfile::tempdir().unwrap();
        let liquidity = dir.path().join("liquidity.csv");
        std::fs::write(
            &liquidity,
            format!(
                "timestamp,tx_hash,address,amount0,amount1,event_type\n\
                 {ts},0x10,{u1},3000000000000000000,1,mint\n\
                 {ts},0x11,{u2},1000000000000000000,1,mint\n\
                 {later},0x12,{u2},1000000000000000000,1,burn\n",
                ts = DAY + 10,
                later = DAY + 20,
                u1 = U1,
                u2 = U2
            ),
        )
        .unwrap();

        let config = config(
            dir.path(),
            &scenario_csv(),
            &[("LIQUIDITY_CSV_PATH", liquidity.to_str().unwrap())],
        );
        let out = config.output_dir.clone();
        let oracle = MockOracle::new(&[POOL, VAULT], &[]);

        PipelineEngine::with_oracle(config, oracle).run().await.unwrap();

        let shares = read_rows(&out.join("liquidity_shares.csv"));
        assert_eq!(shares, vec![vec![U1.to_string(), "1.0".to_string(), "3.0".to_string()]]);
    }

    #[tokio::test]
    async fn test_pool_positions_include_net_withdrawers() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = String::from("block_number,timestamp,tx_hash,from_address,to_address,amount\n");
        csv += &transfer(1, DAY + 100, "0x01", MINT, U1, 100);
        csv += &transfer(2, DAY + 200, "0x02", U1, POOL, 30);
        // U2 withdraws without ever depositing
        csv += &transfer(3, DAY + 300, "0x03", POOL, U2, 10);

        let config = config(dir.path(), &csv, &[("POOL_ADDRESSES", POOL)]);
        let out = config.output_dir.clone();
        let oracle = MockOracle::new(&[POOL], &[]);

        PipelineEngine::with_oracle(config, oracle).run().await.unwrap();

        let positions = read_rows(&out.join("pool_positions.csv"));
        assert_eq!(positions, vec![vec![U1, "30.0"], vec![U2, "-10.0"]]);

        // Shares only count U1, valued against the 20 the pool still holds
        let shares = read_rows(&out.join(format!("pool_shares_{}.csv", POOL)));
        assert_eq!(shares, vec![vec![U1, "1.0", "20.0"]]);
        assert!(!out.join("pool_shares_all.csv").exists());
    }

    #[tokio::test]
    async fn test_unnegatable_amount_rejected_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = String::from("block_number,timestamp,tx_hash,from_address,to_address,amount\n");
        csv += &transfer(1, DAY + 100, "0x01", MINT, U1, 100);
        csv += &format!("2,{},0x02,{},{},{}\n", DAY + 200, U1, U2, i128::MIN);

        let config = config(dir.path(), &csv, &[]);
        let oracle = MockOracle::new(&[], &[]);

        let summary = PipelineEngine::with_oracle(config, oracle).run().await.unwrap();
        assert_eq!(summary.events, 1);
        assert_eq!(summary.rejected_rows, 1);
    }

    #[tokio::test]
    async fn test_balance_overflow_fails_run_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = String::from("block_number,timestamp,tx_hash,from_address,to_address,amount\n");
        csv += &format!("1,{},0x01,{},{},{}\n", DAY + 100, MINT, U1, i128::MAX);
        csv += &format!("2,{},0x02,{},{},{}\n", DAY + 200, U2, U1, i128::MAX);

        let config = config(dir.path(), &csv, &[]);
        let oracle = MockOracle::new(&[], &[]);

        let result = PipelineEngine::with_oracle(config, oracle.clone()).run().await;
        assert!(matches!(result, Err(AttributionError::Overflow(_))));
        assert_eq!(oracle.calls(), 0);
    }
}
