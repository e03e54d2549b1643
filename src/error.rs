//! Error taxonomy for the scan pipeline
//!
//! Every component below the scan loop returns `ArbError`. The loop only needs
//! to know one thing about an error: whether re-running the block is worth it.

use alloy_primitives::TxHash;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArbError>;

#[derive(Debug, Error)]
pub enum ArbError {
    /// Aggregator answered 429
    #[error("Aggregator rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// Aggregator answered with an unexpected non-2xx status
    #[error("Aggregator {endpoint} returned HTTP {status}")]
    Upstream { endpoint: &'static str, status: u16 },

    /// Chain moved past the block the aggregator priced against
    #[error("Stale quote: priced at block {quote_block:?}, chain is at {current_block}")]
    StaleQuote {
        quote_block: Option<u64>,
        current_block: u64,
    },

    /// A single oracle lookup exceeded its time budget
    #[error("Oracle call timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Node / RPC failure
    #[error("Chain error: {0}")]
    Chain(String),

    /// Broadcast went through but confirmations could not be observed
    #[error("Transaction {tx_hash:?} sent but not confirmed: {reason}")]
    Unconfirmed { tx_hash: TxHash, reason: String },

    /// Malformed API body or ABI payload
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArbError {
    /// Transient failures that justify re-running the whole block scan
    pub fn is_retryable(&self) -> bool {
        match self {
            ArbError::RateLimited { .. } => true,
            ArbError::Upstream { .. } => true,
            ArbError::Timeout(_) => true,
            ArbError::Http(_) => true,
            ArbError::Chain(_) => true,
            ArbError::Unconfirmed { .. } => false, // already on the wire
            ArbError::StaleQuote { .. } => false, // skip, don't retry
            ArbError::Decode(_) => false,
            ArbError::Config(_) => false,
            ArbError::Io(_) => false,
            ArbError::Json(_) => false,
        }
    }

    /// Server-requested wait, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ArbError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn chain<E: std::fmt::Display>(e: E) -> Self {
        ArbError::Chain(e.to_string())
    }

    pub fn decode<E: std::fmt::Display>(e: E) -> Self {
        ArbError::Decode(e.to_string())
    }
}
