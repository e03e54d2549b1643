//! Decision Gate
//!
//! Picks the best candidate of a strategy and decides whether it is worth a
//! flash loan: the margin must beat the loan premium, the aggregator's quote
//! must still describe the current chain head, and (optionally) the profit
//! must survive gas.

use alloy_primitives::U256;
use std::fmt;

use super::scanner::{Candidate, Strategy};
use crate::error::{ArbError, Result};
use crate::executor::flash_loan::min_with_slippage;
use crate::oracle::OracleQuote;

/// Margins closer than this are treated as equal
pub const TIE_TOLERANCE: f64 = 1e-9;

/// Flash-loan premium in basis points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLoanFee {
    pub bps: u32,
}

impl FlashLoanFee {
    pub fn from_bps(bps: u32) -> Self {
        Self { bps }
    }

    /// Premium as a fraction (9 bps = 0.0009)
    pub fn rate(&self) -> f64 {
        self.bps as f64 / 10_000.0
    }

    /// Principal plus premium, rounded up
    pub fn with_premium(&self, amount: U256) -> U256 {
        let premium = (amount * U256::from(self.bps)).div_ceil(U256::from(10_000u64));
        amount.saturating_add(premium)
    }
}

impl fmt::Display for FlashLoanFee {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.2}%", self.rate() * 100.0)
    }
}

/// What the gate made of one strategy's candidates
#[derive(Debug)]
pub enum Verdict<'a> {
    /// Nothing priced, or only sentinels
    NoCandidate,
    /// Best margin does not beat the premium
    BelowFee(&'a Candidate),
    /// Best margin beats the premium but the quote is out of date
    Stale(&'a Candidate, ArbError),
    /// Build a transaction for this one
    Fire(&'a Candidate),
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionGate {
    fee: FlashLoanFee,
    slippage_bps: u32,
}

impl DecisionGate {
    pub fn new(fee: FlashLoanFee) -> Self {
        Self { fee, slippage_bps: 0 }
    }

    /// Buffer the pool-first swap is built with
    pub fn with_slippage_bps(mut self, bps: u32) -> Self {
        self.slippage_bps = bps;
        self
    }

    pub fn fee(&self) -> FlashLoanFee {
        self.fee
    }

    /// Highest margin, ignoring sentinels and NaN. Near-equal margins go to
    /// the larger input amount, then to the earlier row.
    pub fn best<'a>(&self, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        let mut best: Option<&Candidate> = None;

        for candidate in candidates {
            if candidate.is_sentinel() || candidate.margin.is_nan() {
                continue;
            }
            best = match best {
                None => Some(candidate),
                Some(current) => {
                    let diff = candidate.margin - current.margin;
                    let better = if diff.abs() <= TIE_TOLERANCE {
                        candidate.cost() > current.cost()
                    } else {
                        diff > 0.0
                    };
                    if better { Some(candidate) } else { Some(current) }
                }
            };
        }

        best
    }

    /// Strictly above the premium
    pub fn is_actionable(&self, candidate: &Candidate) -> bool {
        !candidate.is_sentinel() && candidate.margin > self.fee.rate()
    }

    /// Fails with `StaleQuote` once the chain has moved past the quote's block
    pub fn check_freshness(&self, quote: &OracleQuote, current_block: u64) -> Result<()> {
        match quote.block_number {
            Some(block) if current_block <= block => Ok(()),
            quote_block => Err(ArbError::StaleQuote {
                quote_block,
                current_block,
            }),
        }
    }

    /// `gain - cost * (1 + fee) - gas_cost > 0`, in raw units of the
    /// borrowed asset. A pool-first gain counts only what survives the
    /// slippage buffer on the aggregator leg.
    pub fn clears_gas(&self, candidate: &Candidate, gas_cost: U256) -> bool {
        let gain = match candidate.strategy {
            Strategy::PoolFirst => min_with_slippage(candidate.gain(), self.slippage_bps),
            Strategy::OracleFirst => candidate.gain(),
        };
        let owed = self.fee.with_premium(candidate.cost()).saturating_add(gas_cost);
        gain > owed
    }

    pub fn evaluate<'a>(&self, candidates: &'a [Candidate], current_block: u64) -> Verdict<'a> {
        let Some(best) = self.best(candidates) else {
            return Verdict::NoCandidate;
        };
        if !self.is_actionable(best) {
            return Verdict::BelowFee(best);
        }
        match self.check_freshness(&best.quote, current_block) {
            Ok(()) => Verdict::Fire(best),
            Err(e) => Verdict::Stale(best, e),
        }
    }
}
