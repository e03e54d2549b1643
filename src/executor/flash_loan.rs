//! Flash Loan Transaction Builder
//!
//! Turns a winning candidate into an Aave V2 `flashLoan` call whose `params`
//! carry the settlement contract's instructions:
//!
//! ```text
//! (bool isPoolFirst, uint256 i, uint256 j, uint256 amountIn,
//!  uint256 minAmountOut, uint256 deadline, bytes externalCalldata)
//! ```
//!
//! `externalCalldata` is the aggregator's swap, built for the settlement
//! contract as the executing account.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall, SolValue};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::brain::{Candidate, FlashLoanFee, Strategy};
use crate::chain::ChainClient;
use crate::error::{ArbError, Result};
use crate::oracle::{PriceSource, SwapRequest};
use crate::tokens::TokenRegistry;

// ============================================
// SOLIDITY INTERFACES
// ============================================

sol! {
    /// Aave V2 lending pool
    interface IAaveLendingPool {
        function flashLoan(
            address receiverAddress,
            address[] calldata assets,
            uint256[] calldata amounts,
            uint256[] calldata modes,
            address onBehalfOf,
            bytes calldata params,
            uint16 referralCode
        ) external;

        function FLASHLOAN_PREMIUM_TOTAL() external view returns (uint256);
    }

    interface ILendingPoolAddressesProvider {
        function getLendingPool() external view returns (address);
    }
}

/// Settlement contract instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementParams {
    pub is_pool_first: bool,
    pub i: usize,
    pub j: usize,
    pub amount_in: U256,
    pub min_amount_out: U256,
    pub deadline: u64,
    pub external_calldata: Bytes,
}

impl SettlementParams {
    /// Head/tail encoding of the seven fields, as `abi.decode` expects
    pub fn encode(&self) -> Bytes {
        (
            self.is_pool_first,
            U256::from(self.i),
            U256::from(self.j),
            self.amount_in,
            self.min_amount_out,
            U256::from(self.deadline),
            self.external_calldata.clone(),
        )
            .abi_encode_params()
            .into()
    }
}

/// A flash loan ready to estimate or send
#[derive(Debug, Clone)]
pub struct FlashLoanTransaction {
    /// Lending pool
    pub to: Address,
    pub calldata: Bytes,
    pub asset: Address,
    pub amount: U256,
    pub params: SettlementParams,
}

// ============================================
// SLIPPAGE
// ============================================

/// `amount * (1 - bps)`, rounded down
pub fn min_with_slippage(amount: U256, bps: u32) -> U256 {
    amount * U256::from(10_000u32.saturating_sub(bps)) / U256::from(10_000u64)
}

/// `amount * (1 + bps)`, rounded up
pub fn max_with_slippage(amount: U256, bps: u32) -> U256 {
    (amount.saturating_mul(U256::from(10_000 + bps))).div_ceil(U256::from(10_000u64))
}

// ============================================
// LENDING POOL DISCOVERY
// ============================================

/// Resolve the lending pool behind `addresses_provider` and read its premium
pub async fn resolve_lending_pool(
    chain: &dyn ChainClient,
    addresses_provider: Address,
) -> Result<(Address, FlashLoanFee)> {
    let output = chain
        .call(
            addresses_provider,
            ILendingPoolAddressesProvider::getLendingPoolCall {}.abi_encode().into(),
            None,
        )
        .await?;
    let lending_pool = ILendingPoolAddressesProvider::getLendingPoolCall::abi_decode_returns(&output)
        .map_err(ArbError::decode)?;

    let output = chain
        .call(
            lending_pool,
            IAaveLendingPool::FLASHLOAN_PREMIUM_TOTALCall {}.abi_encode().into(),
            None,
        )
        .await?;
    let premium = IAaveLendingPool::FLASHLOAN_PREMIUM_TOTALCall::abi_decode_returns(&output)
        .map_err(ArbError::decode)?;
    let bps = u32::try_from(premium)
        .map_err(|_| ArbError::Decode(format!("Flash loan premium out of range: {}", premium)))?;

    let fee = FlashLoanFee::from_bps(bps);
    info!("✓ Lending pool {:?}, flash loan fee {}", lending_pool, fee);
    Ok((lending_pool, fee))
}

// ============================================
// TRANSACTION BUILDER
// ============================================

pub struct TransactionBuilder {
    chain: Arc<dyn ChainClient>,
    oracle: Arc<dyn PriceSource>,
    tokens: Arc<TokenRegistry>,
    slot_assets: Vec<Address>,
    settlement: Address,
    lending_pool: Address,
    slippage_bps: u32,
    deadline_secs: u64,
}

impl TransactionBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        oracle: Arc<dyn PriceSource>,
        tokens: Arc<TokenRegistry>,
        slot_assets: Vec<Address>,
        settlement: Address,
        lending_pool: Address,
        slippage_bps: u32,
        deadline_secs: u64,
    ) -> Self {
        Self {
            chain,
            oracle,
            tokens,
            slot_assets,
            settlement,
            lending_pool,
            slippage_bps,
            deadline_secs,
        }
    }

    /// Aggregator swap request for the candidate's oracle leg, and the amount
    /// the flash loan must borrow
    fn swap_request(&self, candidate: &Candidate) -> Result<(SwapRequest, U256)> {
        let quote = &candidate.quote;
        let mut route = quote
            .route
            .clone()
            .ok_or_else(|| ArbError::Decode("Cannot build a swap for a route-less quote".to_string()))?;

        let (src_amount, dest_amount, borrow) = match candidate.strategy {
            Strategy::PoolFirst => {
                let dest = min_with_slippage(quote.dest_amount, self.slippage_bps);
                if let Some(details) = route.get_mut("details").and_then(Value::as_object_mut) {
                    details.insert("destAmount".to_string(), Value::String(dest.to_string()));
                }
                (quote.src_amount, dest, candidate.sample.dx)
            }
            Strategy::OracleFirst => {
                let src = max_with_slippage(quote.src_amount, self.slippage_bps);
                (src, quote.dest_amount, src)
            }
        };

        let swap = SwapRequest {
            route,
            src_token: quote.from,
            dest_token: quote.to,
            src_amount,
            dest_amount,
            src_decimals: self.tokens.decimals(&quote.from)?,
            dest_decimals: self.tokens.decimals(&quote.to)?,
            user_address: self.settlement,
        };
        Ok((swap, borrow))
    }

    /// Build the flash loan for `candidate`, with the deadline counted from
    /// the current head's timestamp
    pub async fn build(&self, candidate: &Candidate) -> Result<FlashLoanTransaction> {
        let on_behalf_of = self
            .chain
            .sender()
            .ok_or_else(|| ArbError::Config("Building a flash loan requires PRIVATE_KEY".to_string()))?;

        let (swap, amount) = self.swap_request(candidate)?;
        let external_calldata = self.oracle.build_transaction(&swap).await?;
        let head = self.chain.block_number().await?;
        let deadline = self.chain.block_timestamp(head).await? + self.deadline_secs;

        let sample = &candidate.sample;
        let params = SettlementParams {
            is_pool_first: candidate.strategy == Strategy::PoolFirst,
            i: sample.i,
            j: sample.j,
            amount_in: sample.dx,
            min_amount_out: sample.dy,
            deadline,
            external_calldata,
        };

        let asset = self.slot_assets[candidate.borrow_slot()];
        let call = IAaveLendingPool::flashLoanCall {
            receiverAddress: self.settlement,
            assets: vec![asset],
            amounts: vec![amount],
            modes: vec![U256::ZERO],
            onBehalfOf: on_behalf_of,
            params: params.encode(),
            referralCode: 0,
        };

        debug!(
            "Flash loan {} of {} for {} (i={}, j={})",
            amount,
            self.tokens.label(&asset),
            candidate.strategy,
            sample.i,
            sample.j
        );

        Ok(FlashLoanTransaction {
            to: self.lending_pool,
            calldata: call.abi_encode().into(),
            asset,
            amount,
            params,
        })
    }
}
