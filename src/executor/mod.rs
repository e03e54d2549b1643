//! The Executor
//!
//! Takes a candidate the gate fired on and carries it as far as the execution
//! mode allows:
//! - Simulation: report it
//! - DryRun: build the flash loan, estimate gas, run gas accounting
//! - Production: all of the above, then send and wait for confirmations
//!
//! ⚠️  WARNING: Production mode interacts with real funds!

pub mod flash_loan;

pub use flash_loan::{resolve_lending_pool, FlashLoanTransaction, TransactionBuilder};

use alloy_primitives::{Address, TxHash, U256};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::brain::{Candidate, DecisionGate, Strategy};
use crate::chain::ChainClient;
use crate::config::{ExecutionMode, OpportunityLog};
use crate::error::{ArbError, Result};
use crate::gas_oracle::GasOracle;
use crate::tokens::TokenRegistry;

/// Result of an execution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Simulation mode: would have built a flash loan
    Simulated,

    /// Dry run: built and estimated, not sent
    DryRun { gas_limit: u64, cleared_gas: bool },

    /// Sent and confirmed (production mode)
    Submitted { tx_hash: TxHash },

    /// Sent, but confirmations were never observed
    Unconfirmed { tx_hash: TxHash },

    /// Not sent
    Skipped { reason: String },
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionOutcome::Simulated => write!(f, "simulated"),
            ExecutionOutcome::DryRun { gas_limit, cleared_gas } => write!(
                f,
                "dry run (gas {}, {})",
                gas_limit,
                if *cleared_gas { "clears gas" } else { "does not clear gas" }
            ),
            ExecutionOutcome::Submitted { tx_hash } => write!(f, "submitted {:?}", tx_hash),
            ExecutionOutcome::Unconfirmed { tx_hash } => write!(f, "sent {:?}, unconfirmed", tx_hash),
            ExecutionOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// The main execution engine
pub struct ExecutionEngine {
    mode: ExecutionMode,
    chain: Arc<dyn ChainClient>,
    builder: TransactionBuilder,
    gate: DecisionGate,
    gas: GasOracle,
    tokens: Arc<TokenRegistry>,
    slot_assets: Vec<Address>,
    required_confirmations: u64,
    gas_accounting: bool,
    opportunity_log: Option<String>,
    /// Strategies that already broadcast in the current round
    sent_this_round: Mutex<Vec<Strategy>>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: ExecutionMode,
        chain: Arc<dyn ChainClient>,
        builder: TransactionBuilder,
        gate: DecisionGate,
        gas: GasOracle,
        tokens: Arc<TokenRegistry>,
        slot_assets: Vec<Address>,
        required_confirmations: u64,
        gas_accounting: bool,
    ) -> Self {
        Self {
            mode,
            chain,
            builder,
            gate,
            gas,
            tokens,
            slot_assets,
            required_confirmations,
            gas_accounting,
            opportunity_log: None,
            sent_this_round: Mutex::new(Vec::new()),
        }
    }

    /// Append every executed candidate to a JSON-lines file
    pub fn with_opportunity_log(mut self, path: impl Into<String>) -> Self {
        self.opportunity_log = Some(path.into());
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Start a new round. Retries inside one round never broadcast the same
    /// strategy twice.
    pub async fn begin_round(&self) {
        self.sent_this_round.lock().await.clear();
    }

    /// Execute a candidate the gate fired on, scanned at `block`
    pub async fn execute(&self, candidate: &Candidate, block: u64) -> Result<ExecutionOutcome> {
        let outcome = match self.mode {
            ExecutionMode::Simulation => {
                info!(
                    "📋 SIMULATION MODE: would borrow {} {} for {} (i={}, j={})",
                    candidate.cost(),
                    self.tokens.label(&self.slot_assets[candidate.borrow_slot()]),
                    candidate.strategy,
                    candidate.sample.i,
                    candidate.sample.j
                );
                ExecutionOutcome::Simulated
            }
            ExecutionMode::DryRun | ExecutionMode::Production => self.build_and_send(candidate).await?,
        };

        if let Some(path) = &self.opportunity_log {
            self.log_opportunity(path, candidate, block, &outcome);
        }
        Ok(outcome)
    }

    async fn build_and_send(&self, candidate: &Candidate) -> Result<ExecutionOutcome> {
        if self.mode == ExecutionMode::Production
            && self.sent_this_round.lock().await.contains(&candidate.strategy)
        {
            warn!("{}: flash loan already sent this round, not sending again", candidate.strategy);
            return Ok(ExecutionOutcome::Skipped {
                reason: "already sent this round".to_string(),
            });
        }

        let tx = self.builder.build(candidate).await?;
        let gas_limit = self.chain.estimate_gas(tx.to, tx.calldata.clone()).await?;
        info!("⛽ Flash loan gas estimate: {}", gas_limit);

        let cleared_gas = if self.gas_accounting {
            let gas_cost = self.gas.cost_in_asset(gas_limit, tx.asset).await?;
            self.log_gas_check(candidate, gas_cost)
        } else {
            true
        };

        if self.mode == ExecutionMode::DryRun {
            info!("🔬 DRY RUN MODE: not sending");
            return Ok(ExecutionOutcome::DryRun { gas_limit, cleared_gas });
        }

        if !cleared_gas {
            return Ok(ExecutionOutcome::Skipped {
                reason: "profit does not cover gas".to_string(),
            });
        }

        info!("🚀 PRODUCTION MODE: sending flash loan of {} {}", tx.amount, self.tokens.label(&tx.asset));
        warn!("⚠️  This will use real funds!");
        self.sent_this_round.lock().await.push(candidate.strategy);

        match self
            .chain
            .send_transaction(tx.to, tx.calldata, gas_limit, self.required_confirmations)
            .await
        {
            Ok(tx_hash) => {
                info!("✅ Confirmed {:?} ({} confirmations)", tx_hash, self.required_confirmations);
                Ok(ExecutionOutcome::Submitted { tx_hash })
            }
            Err(ArbError::Unconfirmed { tx_hash, reason }) => {
                warn!("⚠️  Sent {:?} but could not confirm it: {}", tx_hash, reason);
                Ok(ExecutionOutcome::Unconfirmed { tx_hash })
            }
            Err(e) => Err(e),
        }
    }

    fn log_gas_check(&self, candidate: &Candidate, gas_cost: U256) -> bool {
        let cleared = self.gate.clears_gas(candidate, gas_cost);
        if cleared {
            info!("✓ Profit clears gas cost of {}", gas_cost);
        } else {
            warn!(
                "✗ Gain {} does not cover cost {} + fee {} + gas {}",
                candidate.gain(),
                candidate.cost(),
                self.gate.fee(),
                gas_cost
            );
        }
        cleared
    }

    /// A failed write never fails the scan
    fn log_opportunity(&self, path: &str, candidate: &Candidate, block: u64, outcome: &ExecutionOutcome) {
        let entry = OpportunityLog {
            timestamp: Utc::now(),
            block_number: block,
            strategy: candidate.strategy.to_string(),
            i: candidate.sample.i,
            j: candidate.sample.j,
            borrow_asset: self.tokens.label(&self.slot_assets[candidate.borrow_slot()]),
            amount_in: candidate.sample.dx.to_string(),
            gain: candidate.gain().to_string(),
            cost: candidate.cost().to_string(),
            margin: candidate.margin,
            fee_rate: self.gate.fee().rate(),
            mode: self.mode,
            outcome: outcome.to_string(),
        };

        match entry.append_to_file(path) {
            Ok(()) => info!("📝 Logged opportunity to {}", path),
            Err(e) => warn!("Failed to log opportunity: {}", e),
        }
    }
}
