use thiserror::Error;

/// Error taxonomy for the attribution pipeline
///
/// Per-record and per-address variants (`MalformedRecord`,
/// `ClassificationUnavailable`) are collected and reported by the stage that
/// produced them; they never abort a batch. The remaining variants are fatal.
#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("malformed record at line {line}: field `{field}` = {value:?}")]
    MalformedRecord {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("classification unavailable for {address}: {reason}")]
    ClassificationUnavailable { address: String, reason: String },

    #[error("pool total is zero, shares are undefined")]
    EmptyPool,

    #[error(transparent)]
    AttributionIncomplete(#[from] AttributionIncomplete),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("amount overflow: {0}")]
    Overflow(String),

    #[error("no addresses found in event set")]
    NoAddresses,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("oracle request failed: {0}")]
    Oracle(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Warning raised when the attribution loop stops at its iteration cap
///
/// Carried alongside the partial result instead of replacing it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("attribution stopped after {iterations} iterations with {} contract(s) still holding value", residual.len())]
pub struct AttributionIncomplete {
    pub iterations: usize,
    /// Contracts still custodying value, with their raw residual balance
    pub residual: Vec<(String, i128)>,
}

pub type Result<T> = std::result::Result<T, AttributionError>;
