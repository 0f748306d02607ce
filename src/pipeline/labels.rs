//! Process-scoped wallet label cache
//!
//! Loaded once at pipeline start (see `db::SqliteLabelStore::load`), consulted
//! and extended by the classifier, then flushed once at the end. Labels are
//! write-once per address.

use super::types::{Address, WalletLabel, WalletType};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct LabelCache {
    labels: HashMap<Address, WalletType>,
    /// Labels added since the last save
    unsaved: Vec<WalletLabel>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from persisted labels; these are not considered unsaved
    pub fn from_labels<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = WalletLabel>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|l| (l.address, l.wallet_type))
                .collect(),
            unsaved: Vec::new(),
        }
    }

    pub fn get(&self, address: &Address) -> Option<WalletType> {
        self.labels.get(address).copied()
    }

    /// Insert a label unless one already exists; returns whether it was added
    pub fn insert(&mut self, address: Address, wallet_type: WalletType) -> bool {
        if self.labels.contains_key(&address) {
            return false;
        }
        self.labels.insert(address.clone(), wallet_type);
        self.unsaved.push(WalletLabel { address, wallet_type });
        true
    }

    pub fn unsaved(&self) -> &[WalletLabel] {
        &self.unsaved
    }

    pub fn mark_saved(&mut self) {
        self.unsaved.clear();
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
