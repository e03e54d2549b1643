//! Curve Crypto Pool Quoter
//!
//! Samples the pool's exchange-rate curve for every ordered slot pair.
//! Key properties:
//! - Balances and every `get_dy` sample are read at one pinned block, so all
//!   samples in a snapshot describe the same reserve state
//! - Two Multicall3 round trips per scan (balances, then all quotes)
//! - Nothing is cached between scans
//!
//! Two topologies are supported: a plain pool quoting with `get_dy`, and a
//! meta pool whose underlying coins are quoted through a zap's
//! `get_dy_underlying`.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::multicall::Multicall;
use crate::error::{ArbError, Result};

// ============================================
// SOLIDITY INTERFACES
// ============================================

sol! {
    /// Curve crypto pool (tricrypto style, uint256 indices)
    interface ICryptoSwap {
        function balances(uint256 i) external view returns (uint256);
        function get_dy(uint256 i, uint256 j, uint256 dx) external view returns (uint256);
    }

    /// Curve zap over a meta pool
    interface ICryptoZap {
        function get_dy_underlying(uint256 i, uint256 j, uint256 dx) external view returns (uint256);
    }
}

// ============================================
// POOL TOPOLOGY
// ============================================

/// Where the pool's slots live and which read function quotes them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolTopology {
    /// All slots in one pool, quoted with `get_dy`
    Plain { pool: Address, n_coins: usize },

    /// Slots `0..base_coins` are the base pool's coins, the rest are the
    /// crypto pool's coins after its LP slot. Quoted with the zap's
    /// `get_dy_underlying`.
    Meta {
        pool: Address,
        base_pool: Address,
        zap: Address,
        base_coins: usize,
        n_coins: usize,
    },
}

impl PoolTopology {
    /// The crypto pool itself
    pub fn pool(&self) -> Address {
        match self {
            PoolTopology::Plain { pool, .. } | PoolTopology::Meta { pool, .. } => *pool,
        }
    }

    /// Number of tradable slots
    pub fn n_slots(&self) -> usize {
        match self {
            PoolTopology::Plain { n_coins, .. } => *n_coins,
            PoolTopology::Meta { base_coins, n_coins, .. } => base_coins + n_coins.saturating_sub(1),
        }
    }

    /// Balance reads, in slot order
    fn balance_calls(&self) -> Vec<(Address, Bytes)> {
        let balance = |target: Address, k: usize| {
            (
                target,
                Bytes::from(ICryptoSwap::balancesCall { i: U256::from(k) }.abi_encode()),
            )
        };

        match self {
            PoolTopology::Plain { pool, n_coins } => (0..*n_coins).map(|k| balance(*pool, k)).collect(),
            PoolTopology::Meta { pool, base_pool, base_coins, n_coins, .. } => (0..*base_coins)
                .map(|k| balance(*base_pool, k))
                .chain((1..*n_coins).map(|k| balance(*pool, k)))
                .collect(),
        }
    }

    /// Quote read for one sample
    fn quote_call(&self, i: usize, j: usize, dx: U256) -> (Address, Bytes) {
        let (i, j) = (U256::from(i), U256::from(j));
        match self {
            PoolTopology::Plain { pool, .. } => (
                *pool,
                ICryptoSwap::get_dyCall { i, j, dx }.abi_encode().into(),
            ),
            PoolTopology::Meta { zap, .. } => (
                *zap,
                ICryptoZap::get_dy_underlyingCall { i, j, dx }.abi_encode().into(),
            ),
        }
    }

    fn decode_quote(&self, data: &[u8]) -> Result<U256> {
        let decoded = match self {
            PoolTopology::Plain { .. } => ICryptoSwap::get_dyCall::abi_decode_returns(data),
            PoolTopology::Meta { .. } => ICryptoZap::get_dy_underlyingCall::abi_decode_returns(data),
        };
        decoded.map_err(|e| ArbError::Decode(format!("Failed to decode pool quote: {}", e)))
    }
}

/// Sample grid over each input slot's balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRange {
    /// Samples per ordered pair
    pub count: usize,
    /// Smallest sample, in basis points of the input balance
    pub lower_bps: u32,
    /// Largest sample, in basis points of the input balance
    pub upper_bps: u32,
}

impl SampleRange {
    /// Input amounts linearly spaced over `[balance*lower, balance*upper]`
    pub fn amounts(&self, balance: U256) -> Vec<U256> {
        let bps = U256::from(10_000u64);
        let lo = balance * U256::from(self.lower_bps) / bps;
        let hi = balance * U256::from(self.upper_bps) / bps;

        match self.count {
            0 => Vec::new(),
            1 => vec![lo],
            n => {
                let span = hi.saturating_sub(lo);
                let steps = U256::from(n - 1);
                (0..n)
                    .map(|k| lo + span * U256::from(k) / steps)
                    .collect()
            }
        }
    }
}

// ============================================
// SNAPSHOT TYPES
// ============================================

/// Pool reserves at one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub block: u64,
    pub balances: Vec<U256>,
}

/// One point on the pool's curve: `dx` of slot `i` buys `dy` of slot `j`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteSample {
    pub i: usize,
    pub j: usize,
    pub dx: U256,
    pub dy: U256,
}

/// Everything the scanner needs from one block
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub state: PoolState,
    pub samples: Vec<QuoteSample>,
}

// ============================================
// POOL QUOTER
// ============================================

pub struct PoolQuoter {
    multicall: Multicall,
    topology: PoolTopology,
    range: SampleRange,
}

impl PoolQuoter {
    pub fn new(multicall: Multicall, topology: PoolTopology, range: SampleRange) -> Self {
        Self {
            multicall,
            topology,
            range,
        }
    }

    /// Ordered slot pairs (i, j), i != j
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        let n = self.topology.n_slots();
        (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .collect()
    }

    /// Read every slot balance at `block`
    pub async fn fetch_state(&self, block: u64) -> Result<PoolState> {
        let results = self
            .multicall
            .aggregate(self.topology.balance_calls(), Some(block))
            .await?;

        let balances = results
            .iter()
            .map(|data| {
                ICryptoSwap::balancesCall::abi_decode_returns(data)
                    .map_err(|e| ArbError::Decode(format!("Failed to decode balance: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PoolState { block, balances })
    }

    /// Sample the curve at `block`
    pub async fn sample(&self, block: u64) -> Result<PoolSnapshot> {
        let state = self.fetch_state(block).await?;

        let mut grid: Vec<(usize, usize, U256)> = Vec::new();
        for (i, j) in self.pairs() {
            for dx in self.range.amounts(state.balances[i]) {
                grid.push((i, j, dx));
            }
        }

        let calls = grid
            .iter()
            .map(|&(i, j, dx)| self.topology.quote_call(i, j, dx))
            .collect();

        let start = Instant::now();
        let results = self.multicall.aggregate(calls, Some(block)).await?;
        debug!(
            "Multicall response time: {:.2}s ({} samples)",
            start.elapsed().as_secs_f64(),
            grid.len()
        );

        let samples = grid
            .into_iter()
            .zip(results.iter())
            .map(|((i, j, dx), data)| {
                Ok(QuoteSample {
                    i,
                    j,
                    dx,
                    dy: self.topology.decode_quote(data)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PoolSnapshot { state, samples })
    }
}
