//! Configuration for flasharb
//!
//! Settings come from the environment (and `.env`), or from a TOML file when
//! `CONFIG_PATH` is set. A `DeploymentProfile` bundles everything that is
//! fixed per chain: contract addresses, pool layout, pool assets and the
//! default tuning for that chain.

use alloy_primitives::{address, Address};
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::brain::ScannerConfig;
use crate::cartographer::multicall::MULTICALL3;
use crate::cartographer::stableswap::{PoolTopology, SampleRange};
use crate::oracle::paraswap::DEFAULT_BASE_URL;
use crate::retry::RetryPolicy;

// ============================================
// EXECUTION MODE
// ============================================

/// Execution mode determines how far a winning candidate travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Report what would execute; never builds or sends
    Simulation,

    /// Build the flash loan, estimate gas, run gas accounting, don't send
    DryRun,

    /// Send the flash loan and wait for confirmations
    /// CAUTION: This uses real funds!
    Production,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Simulation
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Simulation => write!(f, "SIMULATION"),
            ExecutionMode::DryRun => write!(f, "DRY_RUN"),
            ExecutionMode::Production => write!(f, "PRODUCTION"),
        }
    }
}

impl ExecutionMode {
    fn from_env_value(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "production" => ExecutionMode::Production,
            "dry_run" | "dryrun" => ExecutionMode::DryRun,
            _ => ExecutionMode::Simulation,
        }
    }

    /// Modes that build transactions need a signing key
    pub fn needs_signer(&self) -> bool {
        !matches!(self, ExecutionMode::Simulation)
    }
}

// ============================================
// DEPLOYMENT PROFILES
// ============================================

/// Per-chain constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentProfile {
    pub name: String,
    pub chain_id: u64,
    pub default_rpc_url: String,

    /// Pool layout and quote entry point
    pub topology: PoolTopology,
    /// Token symbol of each pool slot, in slot order
    pub pool_assets: Vec<String>,
    /// Symbol of the wrapped gas token (gas cost conversion)
    pub wrapped_native: String,

    pub multicall: Address,
    /// Settlement contract (flash loan receiver)
    pub settlement: Address,
    pub lending_pool_addresses_provider: Address,

    /// Aggregator liquidity sources allow-list; empty = all
    pub include_dexs: Vec<String>,

    // Default tuning
    pub workers: usize,
    pub sample_range: SampleRange,
    pub post_scan_pause_secs: u64,
}

impl DeploymentProfile {
    /// Ethereum: USDT/WBTC/WETH tricrypto pool
    pub fn mainnet() -> Self {
        Self {
            name: "mainnet".to_string(),
            chain_id: 1,
            default_rpc_url: "https://eth.llamarpc.com".to_string(),
            topology: PoolTopology::Plain {
                pool: address!("80466c64868E1ab14a1Ddf27A676C3fcBE638Fe5"),
                n_coins: 3,
            },
            pool_assets: vec!["USDT".into(), "WBTC".into(), "WETH".into()],
            wrapped_native: "WETH".to_string(),
            multicall: MULTICALL3,
            settlement: address!("5CfB168f03f8185BD21a3d75f6887c6DCD2B1312"),
            lending_pool_addresses_provider: address!("B53C1a33016B2DC2fF3653530bfF1848a515c8c5"),
            include_dexs: vec!["Uniswap".into(), "Sushiswap".into()],
            workers: 30,
            // balance/500 .. balance/250
            sample_range: SampleRange { count: 100, lower_bps: 20, upper_bps: 40 },
            post_scan_pause_secs: 5,
        }
    }

    /// Polygon: am3CRV base pool under a tricrypto meta pool, quoted via zap
    pub fn polygon() -> Self {
        Self {
            name: "polygon".to_string(),
            chain_id: 137,
            default_rpc_url: "https://polygon-rpc.com".to_string(),
            topology: PoolTopology::Meta {
                pool: address!("751B1e21756bDbc307CBcC5085c042a0e9AaEf36"),
                base_pool: address!("445FE580eF8d70FF569aB36e80c647af338db351"),
                zap: address!("3FCD5De6A9fC8A99995c406c77DDa3eD7E406f81"),
                base_coins: 3,
                n_coins: 3,
            },
            pool_assets: vec!["DAI".into(), "USDC".into(), "USDT".into(), "WBTC".into(), "ETH".into()],
            wrapped_native: "WMATIC".to_string(),
            multicall: MULTICALL3,
            settlement: address!("6E28f4F42aB08b3497bdA0B5bD0486badb883653"),
            lending_pool_addresses_provider: address!("d05e3E715d945B59290df0ae8eF85c1BdB684744"),
            include_dexs: [
                "Uniswap", "Sushiswap", "Aave2", "Curve", "Kyber", "MultiPath", "MegaPath", "Compound", "Bancor",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            workers: 20,
            // balance/500 .. balance/100
            sample_range: SampleRange { count: 10, lower_bps: 20, upper_bps: 100 },
            post_scan_pause_secs: 3,
        }
    }

    pub fn by_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "mainnet" | "ethereum" | "1" => Ok(Self::mainnet()),
            "polygon" | "matic" | "137" => Ok(Self::polygon()),
            other => Err(eyre!("Unknown DEPLOYMENT '{}' (expected mainnet or polygon)", other)),
        }
    }
}

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // ========== Network Settings ==========
    pub rpc_url: String,
    pub deployment: DeploymentProfile,

    /// Signing key for DryRun / Production (KEEP SECRET!)
    #[serde(default, skip_serializing)]
    pub private_key: Option<String>,

    // ========== Aggregator ==========
    pub aggregator_url: String,
    /// Share of pool samples priced per scan
    pub oracle_sample_fraction: f64,
    /// Concurrent price lookups
    pub oracle_workers: usize,
    pub oracle_timeout_secs: u64,
    /// Timed-out lookups become "no route" rows instead of failing the scan
    pub oracle_timeout_as_sentinel: bool,
    pub token_cache_dir: String,

    // ========== Sampling ==========
    pub sample_range: SampleRange,

    // ========== Execution Settings ==========
    pub execution_mode: ExecutionMode,
    /// Slippage buffer on the aggregator leg (100 = 1%)
    pub slippage_bps: u32,
    /// Settlement deadline, seconds after the scanned block
    pub deadline_secs: u64,
    pub required_confirmations: u64,
    /// Require profit to cover gas as well as the flash loan premium
    pub gas_accounting: bool,
    pub opportunity_log: bool,
    pub opportunity_log_path: String,

    // ========== Scan Loop ==========
    pub poll_interval_ms: u64,
    pub post_scan_pause_secs: u64,
    pub retry: RetryPolicy,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// `CONFIG_PATH` TOML file if set, the environment otherwise
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        match env::var("CONFIG_PATH") {
            Ok(path) => {
                let mut config = Self::from_file(&path)?;
                if config.private_key.is_none() {
                    config.private_key = env::var("PRIVATE_KEY").ok();
                }
                Ok(config)
            }
            Err(_) => Self::from_env(),
        }
    }

    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let deployment = DeploymentProfile::by_name(
            &env::var("DEPLOYMENT").unwrap_or_else(|_| "mainnet".to_string()),
        )?;
        let defaults = Self::for_profile(deployment);

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            initial_delay: Duration::try_from_secs_f64(env_parse(
                "RETRY_INITIAL_DELAY_SECS",
                retry_defaults.initial_delay.as_secs_f64(),
            ))
            .unwrap_or(retry_defaults.initial_delay),
            multiplier: env_parse("RETRY_BACKOFF", retry_defaults.multiplier),
            // 0 = uncapped
            max_delay: match env_parse("RETRY_MAX_DELAY_SECS", 300u64) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            jitter: env_parse("RETRY_JITTER", retry_defaults.jitter),
            // 0 = retry forever
            max_attempts: match env_parse("RETRY_MAX_ATTEMPTS", 0u32) {
                0 => None,
                n => Some(n),
            },
        };

        Ok(Self {
            rpc_url: env::var("RPC_URL").unwrap_or(defaults.rpc_url),
            private_key: env::var("PRIVATE_KEY").ok().filter(|k| !k.is_empty()),

            aggregator_url: env::var("AGGREGATOR_URL").unwrap_or(defaults.aggregator_url),
            oracle_sample_fraction: env_parse("ORACLE_SAMPLE_FRACTION", defaults.oracle_sample_fraction),
            oracle_workers: env_parse("ORACLE_WORKERS", defaults.oracle_workers),
            oracle_timeout_secs: env_parse("ORACLE_TIMEOUT_SECS", defaults.oracle_timeout_secs),
            oracle_timeout_as_sentinel: env_parse("ORACLE_TIMEOUT_AS_SENTINEL", defaults.oracle_timeout_as_sentinel),
            token_cache_dir: env::var("TOKEN_CACHE_DIR").unwrap_or(defaults.token_cache_dir),

            sample_range: SampleRange {
                count: env_parse("SAMPLE_COUNT", defaults.sample_range.count),
                lower_bps: env_parse("SAMPLE_LOWER_BPS", defaults.sample_range.lower_bps),
                upper_bps: env_parse("SAMPLE_UPPER_BPS", defaults.sample_range.upper_bps),
            },

            execution_mode: ExecutionMode::from_env_value(
                &env::var("EXECUTION_MODE").unwrap_or_else(|_| "simulation".to_string()),
            ),
            slippage_bps: env_parse("SLIPPAGE_BPS", defaults.slippage_bps),
            deadline_secs: env_parse("DEADLINE_SECS", defaults.deadline_secs),
            required_confirmations: env_parse("REQUIRED_CONFIRMATIONS", defaults.required_confirmations),
            gas_accounting: env_parse("GAS_ACCOUNTING", defaults.gas_accounting),
            opportunity_log: env_parse("OPPORTUNITY_LOG", defaults.opportunity_log),
            opportunity_log_path: env::var("OPPORTUNITY_LOG_PATH").unwrap_or(defaults.opportunity_log_path),

            poll_interval_ms: env_parse("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            post_scan_pause_secs: env_parse("POST_SCAN_PAUSE_SECS", defaults.post_scan_pause_secs),
            retry,

            deployment: defaults.deployment,
        })
    }

    /// Defaults for a deployment
    pub fn for_profile(deployment: DeploymentProfile) -> Self {
        Self {
            rpc_url: deployment.default_rpc_url.clone(),
            private_key: None,
            aggregator_url: DEFAULT_BASE_URL.to_string(),
            oracle_sample_fraction: 0.10,
            oracle_workers: deployment.workers,
            oracle_timeout_secs: 10,
            oracle_timeout_as_sentinel: false,
            token_cache_dir: "./data".to_string(),
            sample_range: deployment.sample_range,
            execution_mode: ExecutionMode::Simulation,
            slippage_bps: 100,
            deadline_secs: 120,
            required_confirmations: 3,
            gas_accounting: true,
            opportunity_log: true,
            opportunity_log_path: format!("./logs/opportunities-{}.jsonl", deployment.chain_id),
            poll_interval_ms: 1_000,
            post_scan_pause_secs: deployment.post_scan_pause_secs,
            retry: RetryPolicy::default(),
            deployment,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file (the private key is never written)
    #[cfg(test)]
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn chain_id(&self) -> u64 {
        self.deployment.chain_id
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            sample_fraction: self.oracle_sample_fraction,
            timeout: self.oracle_timeout(),
            timeout_as_sentinel: self.oracle_timeout_as_sentinel,
        }
    }

    /// Validate configuration before starting
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre!("Invalid RPC_URL - please set a valid node URL"));
        }

        if self.execution_mode.needs_signer() && self.private_key.is_none() {
            return Err(eyre!("{} mode requires PRIVATE_KEY", self.execution_mode));
        }

        let range = &self.sample_range;
        if range.count == 0 {
            return Err(eyre!("SAMPLE_COUNT must be at least 1"));
        }
        if range.lower_bps > range.upper_bps || range.upper_bps > 10_000 {
            return Err(eyre!(
                "Sample range {}..{} bps is invalid (need lower <= upper <= 10000)",
                range.lower_bps,
                range.upper_bps
            ));
        }

        if self.deployment.pool_assets.len() != self.deployment.topology.n_slots() {
            return Err(eyre!(
                "Deployment {} lists {} pool assets for {} pool slots",
                self.deployment.name,
                self.deployment.pool_assets.len(),
                self.deployment.topology.n_slots()
            ));
        }

        if !(self.oracle_sample_fraction > 0.0 && self.oracle_sample_fraction <= 1.0) {
            return Err(eyre!(
                "ORACLE_SAMPLE_FRACTION must be in (0, 1] (currently {})",
                self.oracle_sample_fraction
            ));
        }
        if self.oracle_workers == 0 {
            return Err(eyre!("ORACLE_WORKERS must be at least 1"));
        }
        if self.oracle_timeout_secs == 0 {
            return Err(eyre!("ORACLE_TIMEOUT_SECS must be at least 1"));
        }

        if self.slippage_bps >= 10_000 {
            return Err(eyre!("SLIPPAGE_BPS must be below 10000 (currently {})", self.slippage_bps));
        }
        if self.retry.multiplier < 1.0 {
            return Err(eyre!("RETRY_BACKOFF must be >= 1.0 (currently {})", self.retry.multiplier));
        }
        if self.retry.jitter < 0.0 {
            return Err(eyre!("RETRY_JITTER must not be negative"));
        }

        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║                FLASHARB - CONFIGURATION                    ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Execution Mode:    {:^40} ║", self.execution_mode);
        println!("║ Deployment:        {:^40} ║", self.deployment.name);
        println!("║ Chain ID:          {:^40} ║", self.deployment.chain_id);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ POOL                                                       ║");
        println!("║ • Assets:          {:^40} ║", self.deployment.pool_assets.join("/"));
        println!("║ • Samples/pair:    {:^40} ║", self.sample_range.count);
        println!("║ • Range:           {:^40} ║",
            format!("{}..{} bps of balance", self.sample_range.lower_bps, self.sample_range.upper_bps)
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ AGGREGATOR                                                 ║");
        println!("║ • Sample Fraction: {:>37.0}% ║", self.oracle_sample_fraction * 100.0);
        println!("║ • Workers:         {:^40} ║", self.oracle_workers);
        println!("║ • Timeout:         {:>38}s ║", self.oracle_timeout_secs);
        println!("║ • Sources:         {:^40} ║",
            if self.deployment.include_dexs.is_empty() { "all".to_string() } else { self.deployment.include_dexs.len().to_string() }
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ EXECUTION                                                  ║");
        println!("║ • Slippage:        {:>37.2}% ║", self.slippage_bps as f64 / 100.0);
        println!("║ • Deadline:        {:>38}s ║", self.deadline_secs);
        println!("║ • Confirmations:   {:^40} ║", self.required_confirmations);
        println!("║ • Gas Accounting:  {:^40} ║",
            if self.gas_accounting { "✓ Enabled" } else { "✗ Disabled" }
        );
        println!("║ • Signer Key:      {:^40} ║",
            if self.private_key.is_some() { "✓ Configured" } else { "✗ Not Set" }
        );
        println!("║ • Opportunity Log: {:^40} ║",
            if self.opportunity_log { "✓ Enabled" } else { "✗ Disabled" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_profile(DeploymentProfile::mainnet())
    }
}

// ============================================
// OPPORTUNITY LOGGER
// ============================================

/// One actionable candidate, as appended to the JSON-lines log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityLog {
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub strategy: String,
    pub i: usize,
    pub j: usize,
    pub borrow_asset: String,
    pub amount_in: String,
    pub gain: String,
    pub cost: String,
    pub margin: f64,
    pub fee_rate: f64,
    pub mode: ExecutionMode,
    pub outcome: String,
}

impl OpportunityLog {
    /// Append this log to a file
    pub fn append_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let json = serde_json::to_string(self)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.execution_mode, ExecutionMode::Simulation);
        assert_eq!(config.chain_id(), 1);
        assert_eq!(config.oracle_workers, 30);
        assert_eq!(config.slippage_bps, 100);
        assert_eq!(config.deadline_secs, 120);
        assert_eq!(config.required_confirmations, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_profiles_are_consistent() {
        for profile in [DeploymentProfile::mainnet(), DeploymentProfile::polygon()] {
            assert_eq!(profile.pool_assets.len(), profile.topology.n_slots(), "{}", profile.name);
        }
        assert_eq!(DeploymentProfile::by_name("polygon").unwrap().chain_id, 137);
        assert!(DeploymentProfile::by_name("solana").is_err());
    }

    #[test]
    fn test_execution_mode_parsing() {
        assert_eq!(ExecutionMode::from_env_value("PRODUCTION"), ExecutionMode::Production);
        assert_eq!(ExecutionMode::from_env_value("dryrun"), ExecutionMode::DryRun);
        assert_eq!(ExecutionMode::from_env_value("whatever"), ExecutionMode::Simulation);
    }

    #[test]
    fn test_signer_required_outside_simulation() {
        let mut config = Config::default();
        config.execution_mode = ExecutionMode::DryRun;
        assert!(config.validate().is_err());

        config.private_key = Some("0x01".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_tuning() {
        let bad: Vec<Box<dyn Fn(&mut Config)>> = vec![
            Box::new(|c| c.sample_range.count = 0),
            Box::new(|c| c.sample_range.lower_bps = 500),
            Box::new(|c| c.sample_range.upper_bps = 20_000),
            Box::new(|c| c.oracle_workers = 0),
            Box::new(|c| c.oracle_sample_fraction = 0.0),
            Box::new(|c| c.oracle_sample_fraction = 1.5),
            Box::new(|c| c.slippage_bps = 10_000),
            Box::new(|c| c.retry.multiplier = 0.5),
        ];
        for tweak in bad {
            let mut config = Config::default();
            tweak(&mut config);
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_toml_round_trip_omits_key() {
        let mut config = Config::for_profile(DeploymentProfile::polygon());
        config.private_key = Some("0xsecret".to_string());

        let path = std::env::temp_dir().join(format!("flasharb-config-{}.toml", std::process::id()));
        config.save_to_file(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("0xsecret"));

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.deployment, config.deployment);
        assert_eq!(loaded.private_key, None);
        assert_eq!(loaded.sample_range, config.sample_range);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_opportunity_log_appends_lines() {
        let path = std::env::temp_dir().join(format!("flasharb-opps-{}.jsonl", std::process::id()));
        let _ = fs::remove_file(&path);

        let entry = OpportunityLog {
            timestamp: Utc::now(),
            block_number: 7,
            strategy: "Curve Arb".into(),
            i: 0,
            j: 1,
            borrow_asset: "USDT".into(),
            amount_in: "1000000".into(),
            gain: "1010000".into(),
            cost: "1000000".into(),
            margin: 0.01,
            fee_rate: 0.0009,
            mode: ExecutionMode::Simulation,
            outcome: "simulated".into(),
        };
        entry.append_to_file(&path).unwrap();
        entry.append_to_file(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let parsed: OpportunityLog = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.block_number, 7);
        let _ = fs::remove_file(&path);
    }
}
