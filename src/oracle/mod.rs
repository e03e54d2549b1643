//! Price Oracle - executable quotes from the off-chain aggregator
//!
//! `PriceSource` is the seam between the scanner and the aggregator. The
//! production implementation is `ParaswapClient`; tests use a scripted mock.

pub mod cache;
pub mod paraswap;

pub use cache::ResponseCache;
pub use paraswap::ParaswapClient;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Which amount the caller fixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Fixed input: how much `to` do I get for `amount` of `from`
    Sell,
    /// Fixed output: how much `from` do I pay for `amount` of `to`
    Buy,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Side::Sell => write!(f, "SELL"),
            Side::Buy => write!(f, "BUY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteRequest {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub side: Side,
}

/// One aggregator price answer
#[derive(Debug, Clone, PartialEq)]
pub struct OracleQuote {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub side: Side,
    /// Input amount of `from`
    pub src_amount: U256,
    /// Output amount of `to`
    pub dest_amount: U256,
    /// Opaque `priceRoute`, posted back verbatim when building the swap
    pub route: Option<serde_json::Value>,
    /// Block the aggregator priced against
    pub block_number: Option<u64>,
}

impl OracleQuote {
    /// "No route" answer: nothing out, everything in
    pub fn sentinel(request: &QuoteRequest) -> Self {
        Self {
            from: request.from,
            to: request.to,
            amount: request.amount,
            side: request.side,
            src_amount: U256::MAX,
            dest_amount: U256::ZERO,
            route: None,
            block_number: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.route.is_none()
    }
}

/// Body of a swap-building request
#[derive(Debug, Clone)]
pub struct SwapRequest {
    /// `priceRoute` with any slippage adjustment already applied
    pub route: serde_json::Value,
    pub src_token: Address,
    pub dest_token: Address,
    pub src_amount: U256,
    pub dest_amount: U256,
    pub src_decimals: u8,
    pub dest_decimals: u8,
    /// Account that executes the swap (the settlement contract)
    pub user_address: Address,
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Price `request`. A route-less pair yields `OracleQuote::sentinel`.
    async fn price(&self, request: &QuoteRequest) -> Result<OracleQuote>;

    /// Swap calldata for a previously priced route
    async fn build_transaction(&self, swap: &SwapRequest) -> Result<Bytes>;
}
