//! Faultline Command-Line Interface
//!
//! Parses the proxy flag surface, loads the node identity, builds the
//! engine configuration and runs the proxy until SIGINT.

pub mod args;
pub mod error;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lib_codec::ByzantineOptions;
use lib_proxy::config::{Hooks, ProxyConfig, ProxyConfigOptions, Trigger};
use lib_proxy::{Engine, NodeKey};

use crate::args::FaultlineArgs;
use crate::error::CliError;

/// Entry point for the `faultline` binary.
pub async fn run_cli() -> anyhow::Result<()> {
    let args = FaultlineArgs::parse();
    init_logging();

    let cfg = build_config(&args)?;
    let engine = Engine::new(cfg);
    let metrics = engine.metrics();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = engine.run(shutdown_rx).await;
    info!(counters = ?metrics.snapshot(), "proxy stopped");
    result?;
    Ok(())
}

/// Line-delimited JSON events on stdout; `RUST_LOG` overrides the level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .init();
}

/// Translate the flag surface into a validated engine configuration.
pub fn build_config(args: &FaultlineArgs) -> Result<ProxyConfig, CliError> {
    let action = args
        .attack
        .parse()
        .map_err(|_| CliError::InvalidAction(args.attack.clone()))?;
    let direction = args
        .mutate_direction
        .parse()
        .map_err(|_| CliError::InvalidDirection(args.mutate_direction.clone()))?;
    let node_key = NodeKey::load(&args.node_key)?;

    let options = ByzantineOptions {
        alternate_block_hash: args.alternate_block.clone(),
        alternate_prev_hash: args.alternate_prev_hash.clone(),
        alternate_signature: args.alternate_signature.clone(),
        alternate_validator: args.alternate_validator.clone(),
        round_offset: args.round_offset,
        height_offset: args.height_offset,
        timestamp_shift: parse_signed_duration(&args.timestamp_skew)?,
    };

    let trigger = Trigger {
        height: Some(args.trigger_height).filter(|h| *h > 0),
        round: Some(args.trigger_round).filter(|r| *r > 0),
        step: Some(args.trigger_step.trim().to_ascii_lowercase()).filter(|s| !s.is_empty()),
    };

    let hooks = Hooks {
        delay: args.delay,
        drop: args.drop,
        duplicate: args.duplicate,
    };

    Ok(ProxyConfig::new(ProxyConfigOptions {
        listen_address: args.listen.clone(),
        upstream_target: args.upstream.clone(),
        chain_id: args.chain_id.clone(),
        node_key: Some(node_key),
        action,
        options,
        trigger,
        hooks,
        direction,
        dial_timeout: Some(args.dial_timeout),
    })?)
}

/// Parse a humantime duration with an optional leading minus sign.
fn parse_signed_duration(value: &str) -> Result<chrono::Duration, CliError> {
    let trimmed = value.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let std_duration = humantime::parse_duration(body).map_err(|e| CliError::InvalidTimestampSkew {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    let duration =
        chrono::Duration::from_std(std_duration).map_err(|e| CliError::InvalidTimestampSkew {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
    Ok(if negative { -duration } else { duration })
}
