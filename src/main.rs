//! # Agentlink
//!
//! Command-line front end for the output pipeline.
//!
//! ## Startup
//!
//! 1. **Config** - TOML file if given, then `AGENTLINK_ENDPOINT`, then flags
//! 2. **Sequence store** - file backed when `sequence_path` is set
//! 3. **Output** - connect, wait for the agent identity, start monitoring
//!
//! ## Shutdown
//!
//! SIGINT stops the heartbeat loop. The sampler and monitor stop first,
//! then the client drains its tasks and closes the connection.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::sync::Arc;

use agentlink::{
    AgentlinkConfig, FileSequenceStore, MemorySequenceStore, Output, SequenceStore,
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render config as TOML")?;
            println!("{rendered}");
            Ok(())
        }
        Commands::Send { event } => {
            let event: serde_json::Value =
                serde_json::from_str(&event).context("Event is not valid JSON")?;
            let output = start_output(&config).await?;
            let result = output.publish_event(event).await;
            output.close().await;
            result.context("Event was rejected")?;
            info!("event sent");
            Ok(())
        }
        Commands::Run { data_id, period } => {
            if let Some(data_id) = data_id {
                config.data_id = data_id;
            }
            if let Some(period) = period {
                config.period_secs = period;
            }
            config.validate().context("Invalid configuration")?;
            if config.data_id <= 0 {
                bail!("A positive data id is required (--data-id or data_id in the config)");
            }
            run(&config).await
        }
    }
}

/// Initialize tracing subscriber with env filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> Result<AgentlinkConfig> {
    let config = match &cli.config {
        Some(path) => AgentlinkConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AgentlinkConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(endpoint) = &cli.endpoint {
        config.client.endpoint = Some(endpoint.clone());
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn start_output(config: &AgentlinkConfig) -> Result<Output> {
    let store: Arc<dyn SequenceStore> = match &config.sequence_path {
        Some(path) => Arc::new(FileSequenceStore::open(path.clone()).await.with_context(
            || format!("Failed to open sequence store {}", path.display()),
        )?),
        None => Arc::new(MemorySequenceStore::default()),
    };

    Output::start(config, store)
        .await
        .context("Failed to start output. Is the agent running?")
}

async fn run(config: &AgentlinkConfig) -> Result<()> {
    let output = start_output(config).await?;
    info!(data_id = config.data_id, period_secs = config.period_secs, "publishing heartbeats");

    let mut ticker = tokio::time::interval(config.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let mut count: u64 = 0;
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {
                count += 1;
                let event = json!({
                    "dataid": config.data_id,
                    "name": config.name,
                    "count": count,
                    "time": chrono::Utc::now().to_rfc3339(),
                });
                if let Err(e) = output.publish_event(event).await {
                    warn!(error = %e, "heartbeat not published");
                }
            }
        }
    }

    output.close().await;
    info!(published = count, "shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("received SIGINT, shutting down"),
        Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
    }
}
