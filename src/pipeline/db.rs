//! SQLite persistence for wallet labels
//!
//! Schema: `sql/00_wallet_labels.sql`. The table is read in full at start
//! and appended to at the end of a run (`INSERT OR IGNORE`), so a label
//! written by an earlier run is never overwritten.

use super::labels::LabelCache;
use super::types::{Address, WalletLabel, WalletType};
use crate::error::Result;
use rusqlite::{params, Connection};
use std::path::Path;

const WALLET_LABELS_SCHEMA: &str = include_str!("../../sql/00_wallet_labels.sql");

pub struct SqliteLabelStore {
    conn: Connection,
}

impl SqliteLabelStore {
    /// Open (or create) the label database and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        // journal_mode reports the resulting mode as a row
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.execute_batch(WALLET_LABELS_SCHEMA)?;

        log::info!("🗄️  Label store ready: {}", db_path.display());
        Ok(Self { conn })
    }

    /// In-memory store, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(WALLET_LABELS_SCHEMA)?;
        Ok(Self { conn })
    }

    /// Read every persisted label into a fresh cache
    ///
    /// Rows with an unparseable address or type are skipped with a warning.
    pub fn load(&self) -> Result<LabelCache> {
        let mut stmt = self
            .conn
            .prepare("SELECT address, wallet_type FROM wallet_labels")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut labels = Vec::new();
        for row in rows {
            let (address, wallet_type) = row?;
            match (Address::parse(&address), wallet_type.parse::<WalletType>()) {
                (Ok(address), Ok(wallet_type)) => labels.push(WalletLabel { address, wallet_type }),
                _ => log::warn!("Skipping unreadable label row: {} / {}", address, wallet_type),
            }
        }

        log::info!("📖 Loaded {} cached wallet labels", labels.len());
        Ok(LabelCache::from_labels(labels))
    }

    /// Append labels added since the last save; returns rows written
    pub fn save(&mut self, cache: &mut LabelCache) -> Result<usize> {
        if cache.unsaved().is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO wallet_labels (address, wallet_type, updated_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            for label in cache.unsaved() {
                written += stmt.execute(params![
                    label.address.as_str(),
                    label.wallet_type.as_str(),
                    now
                ])?;
            }
        }
        tx.commit()?;

        log::info!("💾 Saved {} new wallet labels", written);
        cache.mark_saved();
        Ok(written)
    }
}
