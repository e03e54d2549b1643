//! Opportunity Scanner
//!
//! Pairs pool samples with aggregator quotes for the two round trips:
//!
//! - Pool-first: borrow asset i, swap `dx` on the pool for `dy` of asset j,
//!   SELL `dy` on the aggregator back into asset i.
//!   margin = (oracle_dest - dx) / dx
//! - Oracle-first: borrow asset j, BUY `dx` of asset i on the aggregator,
//!   swap it on the pool back into `dy` of asset j.
//!   margin = (pool_dy - oracle_src) / oracle_src
//!
//! Only a random subset of samples is priced. Lookups run concurrently under
//! a shared semaphore, each bounded by a timeout, and results are matched to
//! samples by index.

use alloy_primitives::{Address, U256};
use futures::future::try_join_all;
use rand::seq::index;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cartographer::stableswap::QuoteSample;
use crate::error::{ArbError, Result};
use crate::oracle::{OracleQuote, PriceSource, QuoteRequest, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Pool leg first, aggregator leg second
    PoolFirst,
    /// Aggregator leg first, pool leg second
    OracleFirst,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Strategy::PoolFirst => write!(f, "Curve Arb"),
            Strategy::OracleFirst => write!(f, "Paraswap Arb"),
        }
    }
}

/// One priced sample
#[derive(Debug, Clone)]
pub struct Candidate {
    pub strategy: Strategy,
    pub sample: QuoteSample,
    pub quote: OracleQuote,
    /// (gain - cost) / cost; `-inf` for sentinel quotes
    pub margin: f64,
}

impl Candidate {
    pub fn new(strategy: Strategy, sample: QuoteSample, quote: OracleQuote) -> Self {
        let mut candidate = Self {
            strategy,
            sample,
            quote,
            margin: f64::NEG_INFINITY,
        };
        if !candidate.is_sentinel() {
            candidate.margin = margin(candidate.gain(), candidate.cost());
        }
        candidate
    }

    pub fn is_sentinel(&self) -> bool {
        self.quote.is_sentinel()
    }

    /// What the round trip returns, in units of the borrowed asset
    pub fn gain(&self) -> U256 {
        match self.strategy {
            Strategy::PoolFirst => self.quote.dest_amount,
            Strategy::OracleFirst => self.sample.dy,
        }
    }

    /// What the round trip consumes, in units of the borrowed asset
    pub fn cost(&self) -> U256 {
        match self.strategy {
            Strategy::PoolFirst => self.sample.dx,
            Strategy::OracleFirst => self.quote.src_amount,
        }
    }

    /// Borrowed asset's pool slot
    pub fn borrow_slot(&self) -> usize {
        match self.strategy {
            Strategy::PoolFirst => self.sample.i,
            Strategy::OracleFirst => self.sample.j,
        }
    }
}

/// Signed `(gain - cost) / cost`. The difference is taken in integers; only
/// the ratio is floating point.
pub fn margin(gain: U256, cost: U256) -> f64 {
    if cost.is_zero() {
        return f64::NEG_INFINITY;
    }
    let cost_f = to_f64(cost);
    if gain >= cost {
        to_f64(gain - cost) / cost_f
    } else {
        -(to_f64(cost - gain) / cost_f)
    }
}

pub fn to_f64(value: U256) -> f64 {
    value
        .as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, &limb| acc * 18_446_744_073_709_551_616.0 + limb as f64)
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Share of samples sent to the aggregator, in (0, 1]
    pub sample_fraction: f64,
    /// Budget for one lookup
    pub timeout: Duration,
    /// Replace a timed-out row by a sentinel instead of failing the batch
    pub timeout_as_sentinel: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            sample_fraction: 0.10,
            timeout: Duration::from_secs(10),
            timeout_as_sentinel: false,
        }
    }
}

pub struct OpportunityScanner {
    oracle: Arc<dyn PriceSource>,
    workers: Arc<Semaphore>,
    /// Token address of each pool slot
    slot_assets: Vec<Address>,
    config: ScannerConfig,
}

impl OpportunityScanner {
    pub fn new(
        oracle: Arc<dyn PriceSource>,
        workers: Arc<Semaphore>,
        slot_assets: Vec<Address>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            oracle,
            workers,
            slot_assets,
            config,
        }
    }

    /// Aggregator request that prices the other leg of `sample`
    pub fn request_for(&self, strategy: Strategy, sample: &QuoteSample) -> QuoteRequest {
        let (from, to) = (self.slot_assets[sample.j], self.slot_assets[sample.i]);
        match strategy {
            Strategy::PoolFirst => QuoteRequest {
                from,
                to,
                amount: sample.dy,
                side: Side::Sell,
            },
            Strategy::OracleFirst => QuoteRequest {
                from,
                to,
                amount: sample.dx,
                side: Side::Buy,
            },
        }
    }

    /// Price a random subset of `samples` for `strategy`
    pub async fn scan(&self, strategy: Strategy, samples: &[QuoteSample]) -> Result<Vec<Candidate>> {
        let picked = subsample(samples.len(), self.config.sample_fraction);
        debug!(
            "{}: calling prices API {} time(s) with {} workers",
            strategy,
            picked.len(),
            self.workers.available_permits()
        );

        let start = Instant::now();
        let lookups = picked.into_iter().map(|k| {
            let sample = samples[k];
            let request = self.request_for(strategy, &sample);
            async move {
                let quote = self.lookup(&request).await?;
                Ok::<_, ArbError>(Candidate::new(strategy, sample, quote))
            }
        });
        let candidates = try_join_all(lookups).await?;

        debug!("API response time: {:.2}s", start.elapsed().as_secs_f64());
        Ok(candidates)
    }

    async fn lookup(&self, request: &QuoteRequest) -> Result<OracleQuote> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| ArbError::Config("Oracle worker pool closed".to_string()))?;

        match tokio::time::timeout(self.config.timeout, self.oracle.price(request)).await {
            Ok(result) => result,
            Err(_) if self.config.timeout_as_sentinel => {
                warn!(
                    "Price lookup {:?} -> {:?} timed out, treating as no route",
                    request.from, request.to
                );
                Ok(OracleQuote::sentinel(request))
            }
            Err(_) => Err(ArbError::Timeout(self.config.timeout)),
        }
    }
}

/// Sorted random indices: `max(1, round(len * fraction))` of `0..len`
pub fn subsample(len: usize, fraction: f64) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let amount = ((len as f64 * fraction).round() as usize).clamp(1, len);
    let mut picked = index::sample(&mut rand::thread_rng(), len, amount).into_vec();
    picked.sort_unstable();
    picked
}
