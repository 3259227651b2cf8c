mod config_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use bidfeed_config::{BidfeedConfig, IngressSource};

#[derive(Parser)]
#[command(name = "bidfeed", about = "bidfeed: live auction prices over WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to load instead of discovering one.
    #[arg(long, global = true, env = "BIDFEED_CONFIG")]
    config: Option<PathBuf>,

    /// Directory to search for bidfeed.{toml,yaml,yml,json}.
    #[arg(long, global = true, env = "BIDFEED_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the price gateway.
    Serve {
        #[arg(long, env = "BIDFEED_BIND")]
        bind: Option<String>,
        #[arg(long, env = "BIDFEED_PORT")]
        port: Option<u16>,
        /// Where prices come from: generator or kafka.
        #[arg(long, env = "BIDFEED_SOURCE")]
        source: Option<IngressSource>,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Explicit `--config` wins; otherwise discover, optionally under `--config-dir`.
fn load_config(cli: &Cli) -> anyhow::Result<BidfeedConfig> {
    if let Some(path) = &cli.config {
        return bidfeed_config::load_config(path);
    }
    if let Some(dir) = &cli.config_dir {
        bidfeed_config::set_config_dir(dir.clone());
    }
    Ok(bidfeed_config::discover_and_load())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
    token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match &cli.command {
        Commands::Serve { bind, port, source } => {
            info!(version = env!("CARGO_PKG_VERSION"), "bidfeed starting");
            let mut config = load_config(&cli)?;
            if let Some(bind) = bind {
                config.server.bind = bind.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(source) = source {
                config.ingress.source = *source;
            }

            let shutdown = CancellationToken::new();
            tokio::spawn(cancel_on_signal(shutdown.clone()));
            bidfeed_gateway::start_gateway(config, shutdown).await
        },
        Commands::Config { action } => {
            config_commands::handle_config(action, cli.config.as_deref(), cli.config_dir.as_deref())
        },
    }
}
