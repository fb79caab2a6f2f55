//! opcbridge daemon - OPC UA poller and snapshot server
//!
//! Polls every configured endpoint on a fixed period and serves the latest
//! values over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # Run with the built-in two-server defaults
//! opcbridged
//!
//! # Run with a config file, listening on another port
//! opcbridged --config /etc/opcbridge/config.toml --bind 127.0.0.1:9000
//!
//! # Print the configuration that would be used
//! opcbridged check-config
//! ```

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use opcbridge_core::BridgeConfig;
use opcbridge_protocol::MemoryConnector;
use opcbridged::connector::SchemeConnector;
use opcbridged::poller::{spawn_poller, Poller};
use opcbridged::server::HttpServer;
use opcbridged::simulate::{spawn_simulator, Simulator};
use opcbridged::state::BridgeState;

/// Environment variable naming the config file.
const CONFIG_ENV: &str = "OPCBRIDGE_CONFIG";

/// Environment variable overriding `http.bind`.
const BIND_ENV: &str = "OPCBRIDGE_BIND";

/// opcbridge daemon - OPC UA multi-endpoint poller
#[derive(Parser, Debug)]
#[command(name = "opcbridged", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// HTTP bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Log at debug level by default
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the poller and HTTP server (default)
    Run,
    /// Validate the configuration and print it
    CheckConfig,
}

/// Finds the config file: flag, then environment, then the user config dir.
fn config_path(flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
        .or_else(|| {
            dirs::config_dir()
                .map(|dir| dir.join("opcbridge").join("config.toml"))
                .filter(|path| path.exists())
        })
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match config_path(args.config.clone()) {
        Some(path) => BridgeConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    if let Ok(bind) = env::var(BIND_ENV) {
        config.http.bind = bind;
    }
    if let Some(bind) = &args.bind {
        config.http.bind = bind.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command.as_ref().unwrap_or(&Command::Run) {
        Command::Run => run_daemon(config, args.verbose),
        Command::CheckConfig => {
            let rendered = config
                .to_toml_string()
                .context("Failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_daemon(config: BridgeConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("opcbridged={level}").parse()?)
                .add_directive(format!("opcbridge_core={level}").parse()?)
                .add_directive(format!("opcbridge_protocol={level}").parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        endpoints = config.endpoints.len(),
        "opcbridge daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let state = BridgeState::from_config(&config).context("Invalid configuration")?;

    let memory = MemoryConnector::new();
    let simulator = Simulator::from_config(&config, &memory).context("Invalid configuration")?;
    let simulator_handle = if simulator.is_empty() {
        None
    } else {
        Some(spawn_simulator(simulator, config.interval(), cancel_token.clone()))
    };

    let connector = SchemeConnector::standard(memory);
    for endpoint in &config.endpoints {
        if !connector.supports(endpoint.target.scheme()) {
            warn!(
                endpoint = %endpoint.key,
                scheme = endpoint.target.scheme(),
                "No client for this scheme, endpoint will read as zero"
            );
        }
    }

    let poller = Poller::from_config(&config, Arc::new(connector), state.clone())
        .context("Invalid configuration")?;
    let poller_handle = spawn_poller(poller, cancel_token.clone());

    let server = HttpServer::bind(
        &config.http.bind,
        state,
        &config.http.cors_origins,
        cancel_token.clone(),
    )
    .await;

    let result = match server {
        Ok(server) => server.run().await.context("HTTP server failed"),
        Err(e) => Err(e).context("Failed to start HTTP server"),
    };
    if let Err(e) = &result {
        error!(error = %e, "Server error");
    }

    // Stop the poller even if the server never started
    cancel_token.cancel();
    if let Err(e) = poller_handle.await {
        error!(error = %e, "Poller task failed");
    }
    if let Some(handle) = simulator_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Simulator task failed");
        }
    }

    info!("opcbridge daemon stopped");
    result
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
