//! Chain client
//!
//! The node is an external collaborator. Everything the bot needs from it sits
//! behind `ChainClient` so the pool quoter and the scan loop can be exercised
//! against an in-memory chain.

use alloy_eips::{BlockId, BlockNumberOrTag};
use alloy_network::EthereumWallet;
use alloy_primitives::{Address, Bytes, TxHash};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{ArbError, Result};

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block height
    async fn block_number(&self) -> Result<u64>;

    /// Timestamp (unix seconds) of a block
    async fn block_timestamp(&self, block: u64) -> Result<u64>;

    /// `eth_call`, pinned to `block` when given
    async fn call(&self, to: Address, calldata: Bytes, block: Option<u64>) -> Result<Bytes>;

    /// Gas estimate for a call sent from `sender()`
    async fn estimate_gas(&self, to: Address, calldata: Bytes) -> Result<u64>;

    /// Current gas price in wei
    async fn gas_price(&self) -> Result<u128>;

    /// Sign, send and wait for `confirmations` blocks. Failures after the
    /// broadcast come back as `Unconfirmed`.
    async fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
        gas_limit: u64,
        confirmations: u64,
    ) -> Result<TxHash>;

    /// Account transactions are sent from, if a key is configured
    fn sender(&self) -> Option<Address>;
}

/// `ChainClient` over JSON-RPC / HTTP
pub struct RpcChain {
    provider: DynProvider,
    sender: Option<Address>,
}

impl RpcChain {
    /// Connect to `rpc_url`, attaching a local signer when `private_key` is set
    pub fn connect(rpc_url: &str, private_key: Option<&str>, chain_id: u64) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| ArbError::Config(format!("Invalid RPC_URL {}: {}", rpc_url, e)))?;

        match private_key {
            Some(key) => {
                let signer = PrivateKeySigner::from_str(key.trim_start_matches("0x"))
                    .map_err(|e| ArbError::Config(format!("Invalid PRIVATE_KEY: {}", e)))?
                    .with_chain_id(Some(chain_id));
                let sender = signer.address();
                info!("✓ Signer loaded: {:?}", sender);

                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer))
                    .connect_http(url)
                    .erased();

                Ok(Self {
                    provider,
                    sender: Some(sender),
                })
            }
            None => {
                debug!("No PRIVATE_KEY - read-only chain client");
                let provider = ProviderBuilder::new().connect_http(url).erased();
                Ok(Self {
                    provider,
                    sender: None,
                })
            }
        }
    }
}

#[async_trait]
impl ChainClient for RpcChain {
    async fn block_number(&self) -> Result<u64> {
        self.provider.get_block_number().await.map_err(ArbError::chain)
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block))
            .await
            .map_err(ArbError::chain)?
            .ok_or_else(|| ArbError::Chain(format!("Block {} not found", block)))?;
        Ok(block.header.timestamp)
    }

    async fn call(&self, to: Address, calldata: Bytes, block: Option<u64>) -> Result<Bytes> {
        let tx = TransactionRequest::default().to(to).input(calldata.into());

        let call = self.provider.call(tx);
        let call = match block {
            Some(n) => call.block(BlockId::number(n)),
            None => call,
        };

        call.await
            .map_err(|e| ArbError::Chain(format!("eth_call to {:?} failed: {}", to, e)))
    }

    async fn estimate_gas(&self, to: Address, calldata: Bytes) -> Result<u64> {
        let mut tx = TransactionRequest::default().to(to).input(calldata.into());
        if let Some(from) = self.sender {
            tx = tx.from(from);
        }

        self.provider
            .estimate_gas(tx)
            .await
            .map_err(|e| ArbError::Chain(format!("Gas estimation failed: {}", e)))
    }

    async fn gas_price(&self) -> Result<u128> {
        self.provider.get_gas_price().await.map_err(ArbError::chain)
    }

    async fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
        gas_limit: u64,
        confirmations: u64,
    ) -> Result<TxHash> {
        let from = self
            .sender
            .ok_or_else(|| ArbError::Config("Sending requires PRIVATE_KEY".to_string()))?;

        let tx = TransactionRequest::default()
            .from(from)
            .to(to)
            .input(calldata.into())
            .gas_limit(gas_limit);

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| ArbError::Chain(format!("Transaction submission failed: {}", e)))?;

        let hash = *pending.tx_hash();
        info!("Submitted {:?}, waiting for {} confirmation(s)", hash, confirmations);

        pending
            .with_required_confirmations(confirmations)
            .watch()
            .await
            .map_err(|e| ArbError::Unconfirmed {
                tx_hash: hash,
                reason: e.to_string(),
            })
    }

    fn sender(&self) -> Option<Address> {
        self.sender
    }
}
