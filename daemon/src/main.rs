//! Agora daemon: entry point for running an Agora governance node.

use agora_node::{init_logging, AgoraNode, NodeConfig};
use anyhow::Context;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agora-daemon", about = "Agora governance node daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "AGORA_CONFIG")]
    config: Option<PathBuf>,

    /// Address the RPC server binds to.
    #[arg(long, env = "AGORA_BIND_ADDRESS")]
    bind_address: Option<IpAddr>,

    /// RPC server port.
    #[arg(long, env = "AGORA_RPC_PORT")]
    rpc_port: Option<u16>,

    /// Disable the RPC server.
    #[arg(long, env = "AGORA_DISABLE_RPC")]
    no_rpc: bool,

    /// Log format: "human" or "json".
    #[arg(long, env = "AGORA_LOG_FORMAT")]
    log_format: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "AGORA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Seconds between deadline sweeps.
    #[arg(long, env = "AGORA_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Compliance and executor timeout in milliseconds.
    #[arg(long, env = "AGORA_DEFAULT_TIMEOUT_MS")]
    default_timeout_ms: Option<u64>,

    /// Administrator identities (comma-separated); replaces the file's list.
    #[arg(long, env = "AGORA_ADMINISTRATORS", value_delimiter = ',')]
    administrators: Vec<String>,

    /// Subcommand.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the node until SIGINT/SIGTERM.
    Run,
    /// Print the effective configuration as TOML.
    Config,
    /// Validate the effective configuration and exit.
    Check,
}

impl Cli {
    /// File config (or defaults) with CLI and env overrides applied.
    fn effective_config(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => NodeConfig::default(),
        };
        if let Some(addr) = self.bind_address {
            config.bind_address = addr;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if self.no_rpc {
            config.enable_rpc = false;
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(secs) = self.sweep_interval_secs {
            config.sweep_interval_secs = secs;
        }
        if let Some(ms) = self.default_timeout_ms {
            config.default_timeout_ms = ms;
        }
        if !self.administrators.is_empty() {
            config.administrators = self.administrators.clone();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.effective_config()?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Check => {
            println!("configuration ok");
        }
        Command::Run => {
            init_logging(config.log_format()?, &config.log_level)?;
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            tracing::info!(
                "Starting Agora node (RPC:{}, sweep every {}s, {} administrators)",
                if config.enable_rpc {
                    config.rpc_addr().to_string()
                } else {
                    "off".into()
                },
                config.sweep_interval_secs,
                config.administrators.len(),
            );

            let mut node = AgoraNode::new(config)?;
            node.run().await?;

            tracing::info!("Agora daemon exited cleanly");
        }
    }

    Ok(())
}
