//! Wallet Classifier: EOA vs. contract labels with a write-once cache
//!
//! Per address:
//! 1. Cache hit (lower-case key) → done, no oracle call
//! 2. Miss → checksum the address, wait for a rate-limit slot, ask the oracle
//! 3. Write the answer into the cache before the next result is handled
//!
//! Oracle failures are isolated per address. Under `FallbackPolicy::Strict`
//! the address gets no label and is reported as `ClassificationUnavailable`;
//! under `FallbackPolicy::DefaultToEoa` it is labelled EOA for this run only
//! (the fallback is never persisted).

use super::labels::LabelCache;
use super::oracle::ContractOracle;
use super::types::{Address, WalletType};
use crate::error::{AttributionError, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What to do when the oracle cannot answer for an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Leave unlabelled and exclude from attribution
    Strict,
    /// Treat as EOA for this run
    DefaultToEoa,
}

impl std::str::FromStr for FallbackPolicy {
    type Err = AttributionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(FallbackPolicy::Strict),
            "eoa" | "default_to_eoa" => Ok(FallbackPolicy::DefaultToEoa),
            other => Err(AttributionError::Config(format!(
                "CLASSIFY_FALLBACK must be `strict` or `eoa`, got `{}`",
                other
            ))),
        }
    }
}

/// Spaces the *start* of consecutive oracle calls by at least `min_interval`,
/// across every task sharing the limiter
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserve the next free slot and sleep until it arrives
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Mandatory delay between oracle call starts
    pub call_delay: Duration,
    /// Maximum oracle calls in flight
    pub concurrency: usize,
    pub fallback: FallbackPolicy,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            call_delay: Duration::from_millis(200),
            concurrency: 1,
            fallback: FallbackPolicy::Strict,
        }
    }
}

/// Outcome of one classification pass
#[derive(Debug, Default)]
pub struct Classification {
    /// Every address that received a label (cached, fresh, or fallback)
    pub labels: BTreeMap<Address, WalletType>,
    /// Addresses without a label (always `ClassificationUnavailable`)
    pub unavailable: Vec<AttributionError>,
    pub cache_hits: usize,
    pub oracle_calls: usize,
}

impl Classification {
    pub fn wallet_type(&self, address: &Address) -> Option<WalletType> {
        self.labels.get(address).copied()
    }

    pub fn contracts(&self) -> impl Iterator<Item = &Address> {
        self.labels
            .iter()
            .filter(|(_, t)| **t == WalletType::Contract)
            .map(|(a, _)| a)
    }
}

pub struct WalletClassifier {
    oracle: Arc<dyn ContractOracle>,
    limiter: Arc<RateLimiter>,
    config: ClassifierConfig,
}

impl WalletClassifier {
    pub fn new(oracle: Arc<dyn ContractOracle>, config: ClassifierConfig) -> Self {
        Self {
            oracle,
            limiter: Arc::new(RateLimiter::new(config.call_delay)),
            config,
        }
    }

    /// Classify `addresses`, consulting and extending `cache`
    pub async fn classify<'a, I>(&self, addresses: I, cache: &mut LabelCache) -> Classification
    where
        I: IntoIterator<Item = &'a Address>,
    {
        let unique: BTreeSet<&Address> = addresses.into_iter().collect();
        let mut outcome = Classification::default();
        let mut misses = VecDeque::new();

        for address in unique {
            match cache.get(address) {
                Some(wallet_type) => {
                    outcome.labels.insert(address.clone(), wallet_type);
                    outcome.cache_hits += 1;
                }
                None => misses.push_back(address.clone()),
            }
        }

        log::info!(
            "🔎 Classifying {} addresses ({} cached, {} need oracle lookups)",
            outcome.cache_hits + misses.len(),
            outcome.cache_hits,
            misses.len()
        );

        let window = self.config.concurrency.max(1);
        let mut in_flight: VecDeque<(Address, JoinHandle<Result<bool>>)> = VecDeque::new();

        while !misses.is_empty() || !in_flight.is_empty() {
            while in_flight.len() < window {
                let Some(address) = misses.pop_front() else { break };
                let handle = self.spawn_lookup(&address);
                in_flight.push_back((address, handle));
            }

            let Some((address, handle)) = in_flight.pop_front() else { break };
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(AttributionError::Oracle(format!(
                    "lookup task failed: {}",
                    join_err
                ))),
            };
            outcome.oracle_calls += 1;
            self.record(address, result, cache, &mut outcome);
        }

        if !outcome.unavailable.is_empty() {
            log::warn!(
                "⚠️  {} address(es) could not be classified and are excluded from attribution",
                outcome.unavailable.len()
            );
        }

        outcome
    }

    fn spawn_lookup(&self, address: &Address) -> JoinHandle<Result<bool>> {
        let oracle = Arc::clone(&self.oracle);
        let limiter = Arc::clone(&self.limiter);
        let checksummed = address.to_checksum();

        tokio::spawn(async move {
            let checksummed = checksummed?;
            limiter.acquire().await;
            oracle.is_contract(&checksummed).await
        })
    }

    fn record(
        &self,
        address: Address,
        result: Result<bool>,
        cache: &mut LabelCache,
        outcome: &mut Classification,
    ) {
        match result {
            Ok(is_contract) => {
                let wallet_type = if is_contract {
                    WalletType::Contract
                } else {
                    WalletType::Eoa
                };
                log::debug!("{} → {}", address, wallet_type);
                cache.insert(address.clone(), wallet_type);
                outcome.labels.insert(address, wallet_type);
            }
            Err(e) => match self.config.fallback {
                FallbackPolicy::DefaultToEoa => {
                    log::warn!("Oracle failed for {} ({}), defaulting to EOA", address, e);
                    outcome.labels.insert(address, WalletType::Eoa);
                }
                FallbackPolicy::Strict => {
                    log::warn!("Oracle failed for {}: {}", address, e);
                    outcome.unavailable.push(AttributionError::ClassificationUnavailable {
                        address: address.to_string(),
                        reason: e.to_string(),
                    });
                }
            },
        }
    }
}
