//! Baton daemon: entry point for running a Baton node.

use std::path::PathBuf;

use anyhow::Context;
use baton_node::{init_logging, BatonNode, LogFormat, NodeConfig};
use baton_rpc::{RpcServer, RpcState};
use clap::Parser;

#[derive(Parser)]
#[command(name = "baton-daemon", about = "Baton attendance relay node", version)]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "BATON_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the LMDB store.
    #[arg(long, env = "BATON_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Keep all state in memory; nothing survives a restart.
    #[arg(long, env = "BATON_MEMORY")]
    memory: bool,

    /// Address the HTTP server binds to.
    #[arg(long, env = "BATON_BIND")]
    bind: Option<String>,

    /// HTTP server port.
    #[arg(long, env = "BATON_PORT")]
    port: Option<u16>,

    /// Hex-encoded key for challenge codes, at least 16 bytes.
    #[arg(long, env = "BATON_CHALLENGE_SECRET", hide_env_values = true)]
    challenge_secret: Option<String>,

    /// Disable the Prometheus metrics endpoint.
    #[arg(long, env = "BATON_DISABLE_METRICS")]
    disable_metrics: bool,

    /// Log output format: "human" or "json".
    #[arg(long, env = "BATON_LOG_FORMAT")]
    log_format: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "BATON_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let path = path.to_string_lossy();
                NodeConfig::from_toml_file(&path)
                    .with_context(|| format!("failed to load config file {path}"))?
            }
            None => NodeConfig::default(),
        };

        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        config.memory |= self.memory;
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.rpc_port = port;
        }
        if self.challenge_secret.is_some() {
            config.challenge_secret = self.challenge_secret;
        }
        if self.disable_metrics {
            config.enable_metrics = false;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    let format: LogFormat = config
        .log_format
        .parse()
        .context("invalid log format")?;
    init_logging(format, &config.log_level).context("failed to initialise logging")?;

    tracing::info!(
        listen = %config.listen_addr(),
        storage = if config.memory { "memory" } else { "lmdb" },
        metrics = config.enable_metrics,
        "starting Baton node"
    );

    let mut node = BatonNode::new(config).context("failed to build node")?;
    node.start();

    let server = RpcServer::bind(&node.config().listen_addr(), RpcState::from_node(&node)).await?;
    let shutdown = node.shutdown_controller().clone();
    let signals = shutdown.clone();
    tokio::spawn(async move { signals.wait_for_signal().await });

    let served = server.serve(async move { shutdown.triggered().await }).await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "HTTP server failed");
    }
    node.stop().await?;
    served?;

    tracing::info!("Baton daemon exited cleanly");
    Ok(())
}
