//! holdfast - interactive HTTP intercepting proxy
//!
//! Headless bootstrap: binds the proxy, captures traffic into the store and
//! logs activity. An inspector/list view drives the dispatch boundary
//! through the library API; `--passthrough` instead forwards every captured
//! request unmodified.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use holdfast::config::Config;
use holdfast::proxy::{
    CaptureStore, ChangeNotifier, Dispatcher, EntryStatus, ProxyServer, REFRESH_TICK,
};

/// Interactive HTTP intercepting proxy
#[derive(Parser, Debug)]
#[command(name = "holdfast")]
#[command(author, version, about = "Interactive HTTP intercepting proxy", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HOLDFAST_CONFIG")]
    config: Option<String>,

    /// Proxy listen port
    #[arg(short, long, env = "HOLDFAST_PORT")]
    port: Option<u16>,

    /// Forward every captured request immediately instead of holding it
    #[arg(long, env = "HOLDFAST_PASSTHROUGH")]
    passthrough: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "HOLDFAST_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables daily-rolling file logging)
    #[arg(long, env = "HOLDFAST_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, env = "HOLDFAST_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting holdfast");

    let config = load_config(&cli)?;

    if cli.validate_config {
        tracing::info!("configuration is valid");
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        handle_signals(shutdown_tx_clone).await;
    });

    let result = run(cli, config, shutdown_tx.subscribe()).await;

    tracing::info!("holdfast shut down");
    result
}

/// Initialize the logging system
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let path = std::path::Path::new(log_path);
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("holdfast.log");
        let file_appender = match dir {
            Some(dir) => RollingFileAppender::new(Rotation::DAILY, dir, filename),
            None => {
                let log_dir = Config::data_dir()
                    .map(|d| d.join("logs"))
                    .unwrap_or_else(|_| std::path::PathBuf::from("."));
                std::fs::create_dir_all(&log_dir).ok();
                RollingFileAppender::new(Rotation::DAILY, log_dir, filename)
            }
        };

        if cli.log_json {
            subscriber
                .with(fmt::layer().json().with_writer(file_appender).with_ansi(false))
                .init();
        } else {
            subscriber
                .with(fmt::layer().with_writer(file_appender).with_ansi(false))
                .init();
        }
    } else if cli.log_json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    Ok(())
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    if let Some(port) = cli.port {
        config.proxy.port = port;
    }

    config.validate().context("invalid configuration")?;

    Ok(config)
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    let config = Config::default();
    let toml = toml::to_string_pretty(&config).context("failed to serialize configuration")?;

    println!("{}", toml);
    Ok(())
}

/// Handle shutdown signals
async fn handle_signals(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to register Ctrl+C handler");
        tracing::info!("received Ctrl+C, shutting down");
    }

    let _ = shutdown_tx.send(());
}

/// Run the proxy engine until a shutdown signal arrives.
async fn run(cli: Cli, config: Config, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let store = Arc::new(CaptureStore::new(config.capture.max_entries));
    let notifier = ChangeNotifier::new();

    let server = ProxyServer::new(&config.proxy, store.clone(), notifier.clone());
    server.start().await.context("failed to start proxy")?;

    let ticker = notifier.spawn_ticker(REFRESH_TICK);

    if cli.passthrough {
        tracing::info!("passthrough mode: forwarding every captured request");
        let dispatcher = Dispatcher::new(store.clone(), notifier.clone());
        let mut listener = notifier.subscribe();
        let store = store.clone();
        tokio::spawn(async move {
            while listener.changed().await {
                for entry in store.snapshot() {
                    if entry.status() == EntryStatus::Pending && !entry.is_dispatched() {
                        dispatcher.forward(entry.id, None);
                    }
                }
            }
        });
    }

    let _ = shutdown_rx.recv().await;
    server.stop();
    ticker.abort();

    Ok(())
}
