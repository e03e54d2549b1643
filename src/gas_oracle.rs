//! Gas Price Oracle
//!
//! Node gas price with a short cache, and conversion of a gas bill into raw
//! units of the asset a flash loan borrowed. Non-native assets are priced by
//! asking the aggregator to sell the wei amount of the wrapped native token.

use alloy_primitives::{Address, U256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::chain::ChainClient;
use crate::error::Result;
use crate::oracle::{PriceSource, QuoteRequest, Side};

// ============================================
// CONSTANTS
// ============================================

/// Cache duration for gas prices
const CACHE_DURATION_SECS: u64 = 10;

/// Minimum sane gas price (0.01 gwei)
const MIN_GAS_WEI: u128 = 10_000_000;

/// Maximum sane gas price (10,000 gwei)
const MAX_GAS_WEI: u128 = 10_000_000_000_000;

/// Fallback gas price if the node fails
const FALLBACK_GAS_WEI: u128 = 20_000_000_000;

// ============================================
// CACHED GAS PRICE
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasSource {
    RpcProvider,
    Fallback,
}

impl std::fmt::Display for GasSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GasSource::RpcProvider => write!(f, "RPC"),
            GasSource::Fallback => write!(f, "Fallback"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GasPriceInfo {
    pub gas_price_wei: u128,
    pub fetched_at: Instant,
    pub source: GasSource,
}

impl GasPriceInfo {
    pub fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() > Duration::from_secs(CACHE_DURATION_SECS)
    }

    pub fn gwei(&self) -> f64 {
        self.gas_price_wei as f64 / 1e9
    }

    /// `gas_limit * gas_price` in wei
    pub fn cost_wei(&self, gas_limit: u64) -> U256 {
        U256::from(gas_limit) * U256::from(self.gas_price_wei)
    }
}

// ============================================
// GAS ORACLE
// ============================================

pub struct GasOracle {
    chain: Arc<dyn ChainClient>,
    prices: Arc<dyn PriceSource>,
    /// WETH / WMATIC: gas is paid in its unwrapped form
    wrapped_native: Address,
    cache: RwLock<Option<GasPriceInfo>>,
}

impl GasOracle {
    pub fn new(chain: Arc<dyn ChainClient>, prices: Arc<dyn PriceSource>, wrapped_native: Address) -> Self {
        Self {
            chain,
            prices,
            wrapped_native,
            cache: RwLock::new(None),
        }
    }

    /// Current gas price (cached)
    pub async fn get_gas_price(&self) -> GasPriceInfo {
        {
            let cache = self.cache.read().await;
            if let Some(ref info) = *cache {
                if !info.is_stale() {
                    trace!("Using cached gas price: {:.2} gwei", info.gwei());
                    return info.clone();
                }
            }
        }

        let info = self.fetch_gas_price().await;
        *self.cache.write().await = Some(info.clone());
        info
    }

    async fn fetch_gas_price(&self) -> GasPriceInfo {
        match self.chain.gas_price().await {
            Ok(wei) => {
                let wei = wei.clamp(MIN_GAS_WEI, MAX_GAS_WEI);
                debug!("⛽ Gas from RPC: {:.2} gwei", wei as f64 / 1e9);
                GasPriceInfo {
                    gas_price_wei: wei,
                    fetched_at: Instant::now(),
                    source: GasSource::RpcProvider,
                }
            }
            Err(e) => {
                warn!("RPC gas fetch failed: {}", e);
                warn!("Using fallback gas price: {:.2} gwei", FALLBACK_GAS_WEI as f64 / 1e9);
                GasPriceInfo {
                    gas_price_wei: FALLBACK_GAS_WEI,
                    fetched_at: Instant::now(),
                    source: GasSource::Fallback,
                }
            }
        }
    }

    /// Gas bill for `gas_limit`, in raw units of `asset`. An unpriceable
    /// asset costs `U256::MAX`, so no gas check can pass with it.
    pub async fn cost_in_asset(&self, gas_limit: u64, asset: Address) -> Result<U256> {
        let wei = self.get_gas_price().await.cost_wei(gas_limit);
        if asset == self.wrapped_native {
            return Ok(wei);
        }

        let quote = self
            .prices
            .price(&QuoteRequest {
                from: self.wrapped_native,
                to: asset,
                amount: wei,
                side: Side::Sell,
            })
            .await?;

        if quote.is_sentinel() {
            warn!("No route to price gas in {:?}", asset);
            return Ok(U256::MAX);
        }
        Ok(quote.dest_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, MockOracle, PoolModel};
    use crate::oracle::OracleQuote;

    const WETH: Address = Address::repeat_byte(0xee);
    const USDT: Address = Address::repeat_byte(0x01);

    fn chain() -> Arc<MockChain> {
        Arc::new(MockChain::new(Address::ZERO, PoolModel::constant_product(vec![])))
    }

    #[test]
    fn test_gas_price_info_stale() {
        let info = GasPriceInfo {
            gas_price_wei: FALLBACK_GAS_WEI,
            fetched_at: Instant::now(),
            source: GasSource::Fallback,
        };
        assert!(!info.is_stale());
        assert!((info.gwei() - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_price_is_cached() {
        let chain = chain();
        let gas = GasOracle::new(chain.clone(), Arc::new(MockOracle::fixed_rate(1, 1, 1)), WETH);

        gas.get_gas_price().await;
        gas.get_gas_price().await;
        assert_eq!(chain.gas_price_calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_when_node_fails() {
        let chain = chain();
        chain.fail_gas_price(true);
        let gas = GasOracle::new(chain, Arc::new(MockOracle::fixed_rate(1, 1, 1)), WETH);

        let info = gas.get_gas_price().await;
        assert_eq!(info.source, GasSource::Fallback);
        assert_eq!(info.gas_price_wei, FALLBACK_GAS_WEI);
    }

    #[tokio::test]
    async fn test_native_cost_is_wei() {
        let chain = chain();
        let wei = U256::from(400_000u64) * U256::from(chain.gas_price);
        let gas = GasOracle::new(chain, Arc::new(MockOracle::fixed_rate(1, 1, 1)), WETH);

        assert_eq!(gas.cost_in_asset(400_000, WETH).await.unwrap(), wei);
    }

    #[tokio::test]
    async fn test_other_asset_priced_through_oracle() {
        let chain = chain();
        let wei = U256::from(100_000u64) * U256::from(chain.gas_price);
        // 1 wei of WETH sells for 3 units
        let gas = GasOracle::new(chain, Arc::new(MockOracle::fixed_rate(3, 1, 1)), WETH);

        assert_eq!(gas.cost_in_asset(100_000, USDT).await.unwrap(), wei * U256::from(3u64));
    }

    #[tokio::test]
    async fn test_unpriceable_asset_costs_max() {
        let oracle = MockOracle::new(|req| Ok(OracleQuote::sentinel(req)));
        let gas = GasOracle::new(chain(), Arc::new(oracle), WETH);
        assert_eq!(gas.cost_in_asset(100_000, USDT).await.unwrap(), U256::MAX);
    }
}
