//! Scan Loop
//!
//! One scan per new block, strictly in sequence: sample the pool at the
//! block, price both round trips on the aggregator, let the gate pick, hand
//! whatever fires to the execution engine. A retryable failure re-runs the
//! whole scan on the latest block; anything else ends the loop.

use console::style;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::brain::{Candidate, DecisionGate, OpportunityScanner, Strategy, Verdict};
use crate::cartographer::stableswap::PoolQuoter;
use crate::chain::ChainClient;
use crate::error::Result;
use crate::executor::{ExecutionEngine, ExecutionOutcome};
use crate::retry::RetryPolicy;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Waiting for a block newer than the last scanned one
    Idle,
    Scanning,
}

/// What happened to one strategy's best candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoCandidate,
    BelowFee,
    Stale,
    Executed(ExecutionOutcome),
}

#[derive(Debug, Clone)]
pub struct StrategyReport {
    pub strategy: Strategy,
    pub priced: usize,
    pub best: Option<Candidate>,
    pub decision: Decision,
}

impl StrategyReport {
    pub fn best_margin(&self) -> Option<f64> {
        self.best.as_ref().map(|c| c.margin)
    }
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub block: u64,
    pub samples: usize,
    pub strategies: Vec<StrategyReport>,
    pub elapsed: Duration,
}

impl ScanReport {
    #[cfg(test)]
    pub fn strategy(&self, strategy: Strategy) -> Option<&StrategyReport> {
        self.strategies.iter().find(|r| r.strategy == strategy)
    }

    /// Status lines, margins coloured against the flash loan fee
    pub fn print(&self, fee_rate: f64) {
        println!(
            "{} block {} | {} pool samples | {:.2}s",
            style("▶").cyan(),
            style(self.block).bold(),
            self.samples,
            self.elapsed.as_secs_f64()
        );
        for report in &self.strategies {
            let margin = match report.best_margin() {
                None => style("no route".to_string()).dim(),
                Some(m) if m > fee_rate => style(format!("{:+.4}%", m * 100.0)).green().bold(),
                Some(m) if m > 0.0 => style(format!("{:+.4}%", m * 100.0)).yellow(),
                Some(m) => style(format!("{:+.4}%", m * 100.0)).red(),
            };
            let decision = match &report.decision {
                Decision::NoCandidate => "nothing priced".to_string(),
                Decision::BelowFee => "below fee".to_string(),
                Decision::Stale => "stale quote, skipped".to_string(),
                Decision::Executed(outcome) => outcome.to_string(),
            };
            let size = report
                .best
                .as_ref()
                .map(|c| format!("{}→{} dx={}", c.sample.i, c.sample.j, c.sample.dx))
                .unwrap_or_default();
            println!(
                "  {:<13} best {:>12} {:<28} {} quotes | {}",
                report.strategy.to_string(),
                margin,
                size,
                report.priced,
                decision
            );
        }
    }
}

pub struct ScanLoop {
    chain: Arc<dyn ChainClient>,
    quoter: PoolQuoter,
    scanner: OpportunityScanner,
    gate: DecisionGate,
    engine: ExecutionEngine,
    retry: RetryPolicy,
    poll_interval: Duration,
    post_scan_pause: Duration,
    state: ScanState,
    last_scanned: Option<u64>,
}

impl ScanLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        quoter: PoolQuoter,
        scanner: OpportunityScanner,
        gate: DecisionGate,
        engine: ExecutionEngine,
        retry: RetryPolicy,
        poll_interval: Duration,
        post_scan_pause: Duration,
    ) -> Self {
        Self {
            chain,
            quoter,
            scanner,
            gate,
            engine,
            retry,
            poll_interval,
            post_scan_pause,
            state: ScanState::Idle,
            last_scanned: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ScanState {
        self.state
    }

    #[cfg(test)]
    pub fn last_scanned(&self) -> Option<u64> {
        self.last_scanned
    }

    /// Run until a non-retryable error
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "🔄 Scanning every new block ({} mode, fee {})",
            self.engine.mode(),
            self.gate.fee()
        );
        loop {
            self.step().await?;
        }
    }

    /// Wait for the next block, scan it, report, pause
    pub async fn step(&mut self) -> Result<ScanReport> {
        let block = self.next_block().await?;
        let report = self.run_block(block).await?;
        report.print(self.gate.fee().rate());

        if !self.post_scan_pause.is_zero() {
            tokio::time::sleep(self.post_scan_pause).await;
        }
        Ok(report)
    }

    /// Poll until the chain head is strictly above the last scanned block
    pub async fn next_block(&self) -> Result<u64> {
        loop {
            let head = self.retry.run(|_| self.chain.block_number()).await?;
            match self.last_scanned {
                Some(last) if head <= last => {
                    debug!("{:?}: head {} not past {}", self.state, head, last);
                    tokio::time::sleep(self.poll_interval).await
                }
                _ => return Ok(head),
            }
        }
    }

    /// Scan `block` under the retry policy. Retries move on to the head
    /// at the time of the retry.
    pub async fn run_block(&mut self, block: u64) -> Result<ScanReport> {
        self.state = ScanState::Scanning;
        self.engine.begin_round().await;

        let this = &*self;
        let result = this
            .retry
            .run(|attempt| async move {
                let block = if attempt == 0 {
                    block
                } else {
                    let head = this.chain.block_number().await?.max(block);
                    info!("Re-scanning at block {} (attempt {})", head, attempt + 1);
                    head
                };
                this.scan_block(block).await
            })
            .await;
        self.state = ScanState::Idle;

        let report = result?;
        self.last_scanned = Some(report.block);
        Ok(report)
    }

    /// One attempt at one block
    pub async fn scan_block(&self, block: u64) -> Result<ScanReport> {
        let start = Instant::now();
        let snapshot = self.quoter.sample(block).await?;
        debug!("Block {}: balances {:?}", block, snapshot.state.balances);

        let (pool_first, oracle_first) = tokio::try_join!(
            self.scanner.scan(Strategy::PoolFirst, &snapshot.samples),
            self.scanner.scan(Strategy::OracleFirst, &snapshot.samples),
        )?;

        // Freshness is judged against the head at decision time
        let current_block = self.chain.block_number().await?;

        let mut strategies = Vec::with_capacity(2);
        for (strategy, candidates) in [
            (Strategy::PoolFirst, pool_first),
            (Strategy::OracleFirst, oracle_first),
        ] {
            let decision = match self.gate.evaluate(&candidates, current_block) {
                Verdict::NoCandidate => Decision::NoCandidate,
                Verdict::BelowFee(best) => {
                    debug!("{}: best margin {:.4}% below fee", strategy, best.margin * 100.0);
                    Decision::BelowFee
                }
                Verdict::Stale(best, e) => {
                    warn!(
                        "{}: invalid block number, skipping {:.4}% ({})",
                        strategy,
                        best.margin * 100.0,
                        e
                    );
                    Decision::Stale
                }
                Verdict::Fire(best) => {
                    info!(
                        "💰 {}: margin {:.4}% beats fee {}",
                        strategy,
                        best.margin * 100.0,
                        self.gate.fee()
                    );
                    Decision::Executed(self.engine.execute(best, block).await?)
                }
            };

            strategies.push(StrategyReport {
                strategy,
                priced: candidates.len(),
                best: self.gate.best(&candidates).cloned(),
                decision,
            });
        }

        Ok(ScanReport {
            block,
            samples: snapshot.samples.len(),
            strategies,
            elapsed: start.elapsed(),
        })
    }
}
