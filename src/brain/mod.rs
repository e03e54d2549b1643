//! The Brain
//!
//! Responsible for:
//! - Pricing pool samples against the aggregator (both round-trip directions)
//! - Picking the best candidate and deciding whether it pays for a flash loan

pub mod gate;
pub mod scanner;

pub use gate::{DecisionGate, FlashLoanFee, Verdict};
pub use scanner::{Candidate, OpportunityScanner, ScannerConfig, Strategy};
