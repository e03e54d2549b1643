//! In-memory chain and aggregator for unit tests

use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cartographer::multicall::IMulticall3;
use crate::cartographer::stableswap::{ICryptoSwap, ICryptoZap};
use crate::chain::ChainClient;
use crate::error::{ArbError, Result};
use crate::oracle::{OracleQuote, PriceSource, QuoteRequest, Side, SwapRequest};

// ============================================
// POOL MODEL
// ============================================

/// In-memory pool curve
#[derive(Debug, Clone)]
pub struct PoolModel {
    pub balances: Vec<U256>,
    /// `dy = dx` instead of constant product
    par: bool,
}

impl PoolModel {
    /// Reserve-sensitive: `dy = b_j * dx / (b_i + dx)`
    pub fn constant_product(balances: Vec<U256>) -> Self {
        Self { balances, par: false }
    }

    /// Every swap fills one for one
    pub fn par(balances: Vec<U256>) -> Self {
        Self { balances, par: true }
    }

    pub fn get_dy(&self, i: usize, j: usize, dx: U256) -> U256 {
        if self.par {
            return dx;
        }
        let (bi, bj) = (self.balances[i], self.balances[j]);
        bj * dx / (bi + dx)
    }
}

// ============================================
// MOCK CHAIN
// ============================================

/// How the next send misbehaves once the transaction is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFault {
    /// Confirmations never observed
    Unconfirmed,
    /// Node reports a transport error although it accepted the transaction
    NodeError,
}

pub struct MockChain {
    pool: Address,
    model: Mutex<PoolModel>,
    stubs: Mutex<HashMap<[u8; 4], Bytes>>,
    block: AtomicU64,
    call_blocks: Mutex<Vec<Option<u64>>>,
    failures: AtomicU32,
    sent: Mutex<Vec<(Address, Bytes, u64)>>,
    send_fault: Mutex<Option<SendFault>>,
    gas_price_calls: AtomicUsize,
    gas_price_fails: AtomicBool,
    pub gas_estimate: u64,
    pub gas_price: u128,
    pub timestamp: u64,
    sender: Option<Address>,
}

impl MockChain {
    pub fn new(pool: Address, model: PoolModel) -> Self {
        Self {
            pool,
            model: Mutex::new(model),
            stubs: Mutex::new(HashMap::new()),
            block: AtomicU64::new(1),
            call_blocks: Mutex::new(Vec::new()),
            failures: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            send_fault: Mutex::new(None),
            gas_price_calls: AtomicUsize::new(0),
            gas_price_fails: AtomicBool::new(false),
            gas_estimate: 400_000,
            gas_price: 20_000_000_000,
            timestamp: 1_700_000_000,
            sender: Some(Address::repeat_byte(0x5e)),
        }
    }

    pub fn set_balances(&self, balances: Vec<U256>) {
        self.model.lock().unwrap().balances = balances;
    }

    pub fn set_block(&self, block: u64) {
        self.block.store(block, Ordering::SeqCst);
    }

    /// Answer any call with this selector with `output`
    pub fn stub(&self, selector: [u8; 4], output: Bytes) {
        self.stubs.lock().unwrap().insert(selector, output);
    }

    /// Make the next `n` `eth_call`s fail with a node error
    pub fn fail_next_calls(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Block each `eth_call` was pinned to, in call order
    pub fn call_blocks(&self) -> Vec<Option<u64>> {
        self.call_blocks.lock().unwrap().clone()
    }

    pub fn fail_gas_price(&self, fail: bool) {
        self.gas_price_fails.store(fail, Ordering::SeqCst);
    }

    pub fn gas_price_calls(&self) -> usize {
        self.gas_price_calls.load(Ordering::SeqCst)
    }

    /// Record the next send, then fail it with `fault`
    pub fn fault_next_send(&self, fault: SendFault) {
        *self.send_fault.lock().unwrap() = Some(fault);
    }

    pub fn sent(&self) -> Vec<(Address, Bytes, u64)> {
        self.sent.lock().unwrap().clone()
    }

    fn answer(&self, target: Address, data: &[u8]) -> Option<Bytes> {
        let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;

        if let Some(output) = self.stubs.lock().unwrap().get(&selector) {
            return Some(output.clone());
        }

        let model = self.model.lock().unwrap();
        if selector == ICryptoSwap::balancesCall::SELECTOR {
            let call = ICryptoSwap::balancesCall::abi_decode(data).ok()?;
            let balance = *model.balances.get(call.i.to::<usize>())?;
            return Some(balance.abi_encode().into());
        }
        if target != self.pool {
            return None;
        }
        if selector == ICryptoSwap::get_dyCall::SELECTOR {
            let call = ICryptoSwap::get_dyCall::abi_decode(data).ok()?;
            let dy = model.get_dy(call.i.to(), call.j.to(), call.dx);
            return Some(dy.abi_encode().into());
        }
        if selector == ICryptoZap::get_dy_underlyingCall::SELECTOR {
            let call = ICryptoZap::get_dy_underlyingCall::abi_decode(data).ok()?;
            let dy = model.get_dy(call.i.to(), call.j.to(), call.dx);
            return Some(dy.abi_encode().into());
        }
        None
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        Ok(self.timestamp + block * 12)
    }

    async fn call(&self, to: Address, calldata: Bytes, block: Option<u64>) -> Result<Bytes> {
        self.call_blocks.lock().unwrap().push(block);

        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(ArbError::Chain("connection reset by peer".to_string()));
        }

        if calldata.starts_with(&IMulticall3::aggregate3Call::SELECTOR) {
            let batch = IMulticall3::aggregate3Call::abi_decode(&calldata)
                .map_err(|e| ArbError::Chain(format!("bad multicall: {}", e)))?;
            let results: Vec<IMulticall3::Result> = batch
                .calls
                .iter()
                .map(|c| match self.answer(c.target, &c.callData) {
                    Some(out) => IMulticall3::Result { success: true, returnData: out },
                    None => IMulticall3::Result { success: false, returnData: Bytes::new() },
                })
                .collect();
            return Ok(IMulticall3::aggregate3Call::abi_encode_returns(&results).into());
        }

        self.answer(to, &calldata)
            .ok_or_else(|| ArbError::Chain("execution reverted".to_string()))
    }

    async fn estimate_gas(&self, _to: Address, _calldata: Bytes) -> Result<u64> {
        Ok(self.gas_estimate)
    }

    async fn gas_price(&self) -> Result<u128> {
        self.gas_price_calls.fetch_add(1, Ordering::SeqCst);
        if self.gas_price_fails.load(Ordering::SeqCst) {
            return Err(ArbError::Chain("eth_gasPrice unavailable".to_string()));
        }
        Ok(self.gas_price)
    }

    async fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
        gas_limit: u64,
        _confirmations: u64,
    ) -> Result<TxHash> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to, calldata, gas_limit));
        let tx_hash = TxHash::with_last_byte(sent.len() as u8);

        match self.send_fault.lock().unwrap().take() {
            None => Ok(tx_hash),
            Some(SendFault::Unconfirmed) => Err(ArbError::Unconfirmed {
                tx_hash,
                reason: "receipt watcher timed out".to_string(),
            }),
            Some(SendFault::NodeError) => Err(ArbError::Chain("connection reset by peer".to_string())),
        }
    }

    fn sender(&self) -> Option<Address> {
        self.sender
    }
}

// ============================================
// MOCK ORACLE
// ============================================

type Responder = dyn Fn(&QuoteRequest) -> Result<OracleQuote> + Send + Sync;

pub struct MockOracle {
    responder: Box<Responder>,
    delay: Option<Duration>,
    price_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    built: Mutex<Vec<SwapRequest>>,
}

impl MockOracle {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&QuoteRequest) -> Result<OracleQuote> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            price_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            built: Mutex::new(Vec::new()),
        }
    }

    /// Every pair trades at `num/den`, priced at `block`
    pub fn fixed_rate(num: u64, den: u64, block: u64) -> Self {
        Self::new(move |req| {
            let scaled = req.amount * U256::from(num) / U256::from(den);
            Ok(match req.side {
                Side::Sell => quote(req, req.amount, scaled, block),
                Side::Buy => quote(req, scaled, req.amount, block),
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn price_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn built(&self) -> Vec<SwapRequest> {
        self.built.lock().unwrap().clone()
    }
}

/// Routed quote with the given amounts
pub fn quote(req: &QuoteRequest, src: U256, dest: U256, block: u64) -> OracleQuote {
    OracleQuote {
        from: req.from,
        to: req.to,
        amount: req.amount,
        side: req.side,
        src_amount: src,
        dest_amount: dest,
        route: Some(json!({
            "blockNumber": block,
            "details": { "srcAmount": src.to_string(), "destAmount": dest.to_string() }
        })),
        block_number: Some(block),
    }
}

#[async_trait]
impl PriceSource for MockOracle {
    async fn price(&self, request: &QuoteRequest) -> Result<OracleQuote> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.responder)(request)
    }

    async fn build_transaction(&self, swap: &SwapRequest) -> Result<Bytes> {
        self.built.lock().unwrap().push(swap.clone());
        Ok(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]))
    }
}
