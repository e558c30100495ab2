use alloy::providers::ProviderBuilder;
use alloy_primitives::{Address, U256};
use bluegreen_config::{
    don_id_to_bytes32, ConfigCache, InstanceConfigPoller, InstanceRole, LogSource,
    OffchainConfigDigester, RpcLogSource, ShouldRetireCache,
};
use clap::Parser;
use eyre::{Result, WrapErr};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod report;

use config::TrackerConfig;
use report::build_report;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the tracker JSON configuration file
    #[arg(long, default_value = "./configs/tracker.json")]
    config_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print one report per role and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Blue/Green config tracker");

    let config_path = PathBuf::from(&cli.config_path);
    let config = if config_path.exists() {
        TrackerConfig::load_from_file(&config_path)
            .await
            .wrap_err_with(|| format!("Failed to load {}", config_path.display()))?
            .with_env_overrides()
    } else {
        tracing::warn!(path = %config_path.display(), "Config file not found, using defaults");
        TrackerConfig::default().with_env_overrides()
    };

    let address: Address = config
        .contract_address
        .parse()
        .wrap_err("Invalid contract address")?;

    tracing::info!(
        rpc_url = %config.rpc_url,
        chain_id = config.chain_id,
        %address,
        don_id = config.don_id,
        from_block = config.from_block,
        "Config loaded"
    );

    let provider = ProviderBuilder::new().connect_http(config.rpc_url.parse().wrap_err("Invalid RPC URL")?);
    let log_source: Arc<dyn LogSource> = Arc::new(RpcLogSource::new(provider));
    let config_cache = Arc::new(ConfigCache::new());

    let pollers: Vec<InstanceConfigPoller> = [InstanceRole::Blue, InstanceRole::Green]
        .into_iter()
        .map(|role| {
            InstanceConfigPoller::new(
                log_source.clone(),
                config_cache.clone(),
                address,
                config.don_id,
                role,
                config.from_block,
            )
        })
        .collect();
    for poller in &pollers {
        poller.register_filters().await?;
    }

    let retire_cache = ShouldRetireCache::new(
        log_source.clone(),
        address,
        config.don_id,
        config.from_block,
        config.retire_cache_config(),
    );
    let digester = OffchainConfigDigester::new(
        don_id_to_bytes32(config.don_id),
        U256::from(config.chain_id),
        address,
    );

    let head = log_source.latest_block().await?;
    tracing::info!(head, "Connected to node");

    if cli.once {
        retire_cache.poll_once().await?;
        for poller in &pollers {
            let report = build_report(poller, &digester, &retire_cache).await?;
            println!("{}", serde_json::to_string(&report)?);
        }
        return Ok(());
    }

    retire_cache.start().await?;

    let mut report_interval =
        tokio::time::interval(Duration::from_secs(config.report_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = report_interval.tick() => {
                for poller in &pollers {
                    match build_report(poller, &digester, &retire_cache).await {
                        Ok(report) => println!("{}", serde_json::to_string(&report)?),
                        Err(e) => tracing::warn!(role = %poller.role(), error = %e, "Report failed"),
                    }
                }
                tracing::debug!(
                    cached_configs = config_cache.len(),
                    retired = retire_cache.retired_count(),
                    retire_block = retire_cache.latest_block_num(),
                    "Tracker status"
                );
            }
        }
    }

    retire_cache.close().await?;
    tracing::info!("Config tracker stopped");
    Ok(())
}
