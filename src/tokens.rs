//! Token registry
//!
//! The aggregator's token list for one chain, cached on disk as
//! `tokens-chain-{id}.json`. Loaded once at startup and never mutated.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ArbError, Result};

/// One listed asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: Vec<Token>,
    by_address: HashMap<Address, usize>,
    by_symbol: HashMap<String, usize>,
}

impl TokenRegistry {
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut by_address = HashMap::new();
        let mut by_symbol = HashMap::new();

        for (idx, token) in tokens.iter().enumerate() {
            by_address.entry(token.address).or_insert(idx);
            // First listing wins for duplicate symbols
            by_symbol.entry(token.symbol.clone()).or_insert(idx);
        }

        Self {
            tokens,
            by_address,
            by_symbol,
        }
    }

    /// Cache file for `chain_id` under `dir`
    pub fn cache_path(dir: &Path, chain_id: u64) -> PathBuf {
        dir.join(format!("tokens-chain-{}.json", chain_id))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let tokens: Vec<Token> = serde_json::from_str(&contents)?;
        debug!("Loaded {} tokens from {}", tokens.len(), path.display());
        Ok(Self::new(tokens))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.tokens)?)?;
        Ok(())
    }

    /// Load the cached list, fetching it once with `fetch` when the file is
    /// missing.
    pub async fn load_or_fetch<F, Fut>(dir: &Path, chain_id: u64, fetch: F) -> Result<Self>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<Token>>>,
    {
        let path = Self::cache_path(dir, chain_id);
        if path.exists() {
            return Self::load_from_file(&path);
        }

        let registry = Self::new(fetch().await?);
        registry.save_to_file(&path)?;
        info!(
            "Fetched and saved token list ({} tokens) to {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn by_address(&self, address: &Address) -> Option<&Token> {
        self.by_address.get(address).map(|&idx| &self.tokens[idx])
    }

    pub fn by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.by_symbol.get(symbol).map(|&idx| &self.tokens[idx])
    }

    /// Addresses for `symbols`, in order. Unknown symbols are a config error.
    pub fn addresses(&self, symbols: &[String]) -> Result<Vec<Address>> {
        symbols
            .iter()
            .map(|s| {
                self.by_symbol(s)
                    .map(|t| t.address)
                    .ok_or_else(|| ArbError::Config(format!("Unknown token symbol {}", s)))
            })
            .collect()
    }

    pub fn decimals(&self, address: &Address) -> Result<u8> {
        self.by_address(address)
            .map(|t| t.decimals)
            .ok_or_else(|| ArbError::Config(format!("Unknown token {:?}", address)))
    }

    /// Symbol for display, falling back to the address
    pub fn label(&self, address: &Address) -> String {
        self.by_address(address)
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| format!("{:?}", address))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample_tokens() -> Vec<Token> {
        vec![
            Token { symbol: "USDT".into(), address: Address::repeat_byte(1), decimals: 6 },
            Token { symbol: "WBTC".into(), address: Address::repeat_byte(2), decimals: 8 },
            Token { symbol: "WETH".into(), address: Address::repeat_byte(3), decimals: 18 },
            Token { symbol: "USDT".into(), address: Address::repeat_byte(4), decimals: 6 },
        ]
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("flasharb-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_lookups() {
        let registry = TokenRegistry::new(sample_tokens());
        assert_eq!(registry.by_symbol("WBTC").unwrap().decimals, 8);
        assert_eq!(registry.decimals(&Address::repeat_byte(3)).unwrap(), 18);
        assert_eq!(registry.label(&Address::repeat_byte(2)), "WBTC");
        // duplicate symbol resolves to the first listing
        assert_eq!(registry.by_symbol("USDT").unwrap().address, Address::repeat_byte(1));
    }

    #[test]
    fn test_unknown_symbol_is_config_error() {
        let registry = TokenRegistry::new(sample_tokens());
        let err = registry.addresses(&["DOGE".to_string()]).unwrap_err();
        assert!(matches!(err, ArbError::Config(_)));
    }

    #[tokio::test]
    async fn test_fetches_once_then_reads_cache() {
        let dir = temp_dir("tokens");
        let fetches = AtomicU32::new(0);

        for _ in 0..2 {
            let registry = TokenRegistry::load_or_fetch(&dir, 1, || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(sample_tokens())
            })
            .await
            .unwrap();
            assert_eq!(registry.len(), 4);
            assert_eq!(
                registry.addresses(&["USDT".into(), "WBTC".into(), "WETH".into()]).unwrap(),
                vec![Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3)]
            );
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(TokenRegistry::cache_path(&dir, 1).exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
