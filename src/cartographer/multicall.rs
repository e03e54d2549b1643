//! Multicall3 batching
//!
//! N read-only calls in one `eth_call`, all evaluated against the same block.

use alloy_primitives::{Address, Bytes, address};
use alloy_sol_types::{sol, SolCall};
use std::sync::Arc;
use tracing::trace;

use crate::chain::ChainClient;
use crate::error::{ArbError, Result};

/// Multicall3 address (same on all EVM chains)
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

sol! {
    /// Multicall3 interface for batching
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external payable returns (Result[] memory returnData);
    }
}

/// Batches calls through a Multicall3 deployment
#[derive(Clone)]
pub struct Multicall {
    chain: Arc<dyn ChainClient>,
    address: Address,
}

impl Multicall {
    pub fn new(chain: Arc<dyn ChainClient>, address: Address) -> Self {
        Self { chain, address }
    }

    /// Execute `calls` as one round trip at `block`. Any failing sub-call
    /// reverts the whole batch; results come back in call order.
    pub async fn aggregate(
        &self,
        calls: Vec<(Address, Bytes)>,
        block: Option<u64>,
    ) -> Result<Vec<Bytes>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let expected = calls.len();
        let calls: Vec<IMulticall3::Call3> = calls
            .into_iter()
            .map(|(target, data)| IMulticall3::Call3 {
                target,
                allowFailure: false,
                callData: data,
            })
            .collect();

        trace!("aggregate3 with {} calls at block {:?}", expected, block);

        let calldata = IMulticall3::aggregate3Call { calls }.abi_encode();
        let output = self.chain.call(self.address, calldata.into(), block).await?;

        let decoded = IMulticall3::aggregate3Call::abi_decode_returns(&output)
            .map_err(|e| ArbError::Decode(format!("Failed to decode multicall result: {}", e)))?;

        if decoded.len() != expected {
            return Err(ArbError::Decode(format!(
                "Multicall returned {} results, expected {}",
                decoded.len(),
                expected
            )));
        }

        decoded
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                if r.success {
                    Ok(r.returnData)
                } else {
                    Err(ArbError::Chain(format!("Multicall sub-call {} reverted", i)))
                }
            })
            .collect()
    }
}
