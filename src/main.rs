//! flasharb - Curve / ParaSwap flash-loan arbitrage bot
//!
//! Run with: cargo run
//!
//! Every block: sample the pool's curve, price both round trips on the
//! aggregator, and fire an Aave flash loan when the best margin beats the
//! loan premium.

use color_eyre::eyre::{eyre, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod brain;
mod cartographer;
mod chain;
mod config;
mod error;
mod executor;
mod gas_oracle;
mod oracle;
mod retry;
mod scan_loop;
mod tokens;

#[cfg(test)]
mod testing;

use brain::{DecisionGate, OpportunityScanner};
use cartographer::multicall::Multicall;
use cartographer::stableswap::PoolQuoter;
use chain::{ChainClient, RpcChain};
use config::{Config, ExecutionMode};
use executor::{resolve_lending_pool, ExecutionEngine, TransactionBuilder};
use gas_oracle::GasOracle;
use oracle::{paraswap, ParaswapClient, PriceSource, ResponseCache};
use scan_loop::ScanLoop;
use tokens::TokenRegistry;

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" ⚡ FLASHARB - Curve / ParaSwap Flash Loan Arbitrage").cyan().bold()
    );
    println!(
        "{}",
        style("    Pool sampling | Aggregator quotes | Aave V2 flash loans").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flasharb=info".parse()?),
        )
        .init();

    print_banner();

    // Load configuration
    let config = Config::load()?;

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your .env file or CONFIG_PATH");
        return Err(e);
    }

    // Print configuration summary
    config.print_summary();
    println!();

    if config.execution_mode == ExecutionMode::Production {
        warn!("⚠️  PRODUCTION MODE: flash loans will be sent with real funds");
    }

    let profile = &config.deployment;

    // =============================================
    // SERVICES
    // =============================================
    println!("{}", style("Connecting...").blue());

    let chain: Arc<dyn ChainClient> = Arc::new(RpcChain::connect(
        &config.rpc_url,
        config.private_key.as_deref(),
        config.chain_id(),
    )?);
    let head = chain.block_number().await?;
    println!("{} Node at block {}", style("✓").green(), head);

    let http = reqwest::Client::builder()
        .user_agent(concat!("flasharb/", env!("CARGO_PKG_VERSION")))
        .timeout(config.oracle_timeout())
        .build()?;
    let aggregator = ParaswapClient::new(
        http,
        &config.aggregator_url,
        profile.chain_id,
        paraswap::join_sources(&profile.include_dexs),
        Arc::new(ResponseCache::new()),
    );

    let tokens = Arc::new(
        TokenRegistry::load_or_fetch(Path::new(&config.token_cache_dir), profile.chain_id, || {
            aggregator.fetch_token_list()
        })
        .await?,
    );
    if tokens.is_empty() {
        return Err(eyre!("Token list for chain {} is empty", profile.chain_id));
    }
    println!("{} {} tokens known", style("✓").green(), tokens.len());

    let slot_assets = tokens.addresses(&profile.pool_assets)?;
    let wrapped_native = tokens
        .by_symbol(&profile.wrapped_native)
        .map(|t| t.address)
        .ok_or_else(|| eyre!("Unknown wrapped native token {}", profile.wrapped_native))?;

    let oracle: Arc<dyn PriceSource> = Arc::new(aggregator);

    // =============================================
    // PIPELINE
    // =============================================
    let quoter = PoolQuoter::new(
        Multicall::new(chain.clone(), profile.multicall),
        profile.topology.clone(),
        config.sample_range,
    );
    println!(
        "{} Pool {:?}: {} slots ({}), {} pairs",
        style("✓").green(),
        profile.topology.pool(),
        profile.topology.n_slots(),
        profile.pool_assets.join("/"),
        quoter.pairs().len()
    );

    // One worker pool for every aggregator lookup
    let workers = Arc::new(Semaphore::new(config.oracle_workers));
    let scanner = OpportunityScanner::new(
        oracle.clone(),
        workers,
        slot_assets.clone(),
        config.scanner_config(),
    );

    let (lending_pool, fee) =
        resolve_lending_pool(chain.as_ref(), profile.lending_pool_addresses_provider).await?;
    let gate = DecisionGate::new(fee).with_slippage_bps(config.slippage_bps);
    println!("{} Lending pool {:?}, fee {}", style("✓").green(), lending_pool, fee);

    let builder = TransactionBuilder::new(
        chain.clone(),
        oracle.clone(),
        tokens.clone(),
        slot_assets.clone(),
        profile.settlement,
        lending_pool,
        config.slippage_bps,
        config.deadline_secs,
    );
    let mut engine = ExecutionEngine::new(
        config.execution_mode,
        chain.clone(),
        builder,
        gate,
        GasOracle::new(chain.clone(), oracle.clone(), wrapped_native),
        tokens.clone(),
        slot_assets,
        config.required_confirmations,
        config.gas_accounting,
    );
    if config.opportunity_log {
        engine = engine.with_opportunity_log(config.opportunity_log_path.clone());
    }

    let mut scan_loop = ScanLoop::new(
        chain,
        quoter,
        scanner,
        gate,
        engine,
        config.retry.clone(),
        Duration::from_millis(config.poll_interval_ms),
        Duration::from_secs(config.post_scan_pause_secs),
    );

    println!();
    println!("{}", style("═══ SCANNING (Ctrl-C to stop) ═══").blue().bold());
    println!();

    tokio::select! {
        result = scan_loop.run() => {
            if let Err(e) = result {
                error!("Scan loop stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    Ok(())
}
