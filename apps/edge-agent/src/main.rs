//! # MyRVM Edge Agent
//!
//! Entry point for the device process.
//!
//! ## Startup Sequence
//! 1. Parse the command line and initialize tracing
//! 2. Load configuration (file, secrets.env, environment)
//! 3. Open the offline store, check it answers, purge old synced rows
//! 4. Build the agent (controller, sync engine, protocol driver)
//! 5. Start the kiosk bridge
//! 6. Handshake until the backend accepts the device
//! 7. Run the control loop until SIGINT/SIGTERM
//! 8. Stop the bridge and close the store
//!
//! The bridge starts before the handshake so the kiosk can show
//! "Connecting to server..." while the backend is unreachable.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rvm_db::{Database, DbConfig};
use rvm_edge::{
    AgentOptions, EdgeAgent, EdgeConfig, EdgeError, LoggingCommandHandler, ReqwestTransport,
    SystemProbe,
};

/// Edge agent for MyRVM reverse-vending machines.
#[derive(Debug, Parser)]
#[command(name = "edge-agent", version, about)]
struct Cli {
    /// Path to edge.toml (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one heartbeat cycle and exit
    #[arg(long)]
    once: bool,

    /// Debug logging when RUST_LOG is not set
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting MyRVM edge agent");

    let config = EdgeConfig::load(cli.config).context("Failed to load configuration")?;
    info!(
        base_url = %config.server.base_url,
        serial = %config.device.serial_number,
        "Configuration loaded"
    );

    // Offline store
    let db_path = config.database_path();
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
    }
    let db = Database::new(DbConfig::new(&db_path))
        .await
        .context("Failed to open offline store")?;

    if !db.health_check().await {
        anyhow::bail!("Offline store at {} does not answer queries", db_path.display());
    }
    match rvm_db::migrations::migration_status(db.pool()).await {
        Ok((total, applied)) => info!(
            path = %db_path.display(),
            migrations = total,
            applied,
            "Offline store ready"
        ),
        Err(e) => warn!(error = %e, "Could not read migration status"),
    }

    match db
        .transactions()
        .purge_synced(config.storage.retention_days)
        .await
    {
        Ok(0) => {}
        Ok(purged) => info!(purged, "Purged old synced transactions"),
        Err(e) => warn!(error = %e, "Failed to purge synced transactions"),
    }

    // Runtime components
    let transport = Arc::new(
        ReqwestTransport::new(&config.server.base_url, &config.server.api_key)
            .context("Failed to build HTTP client")?,
    );
    let probe = Arc::new(SystemProbe::new(config.device.version.clone()));

    let mut options = AgentOptions::from_config(&config);
    options.once = cli.once;

    let agent = EdgeAgent::new(
        &config,
        db.clone(),
        transport,
        probe,
        Arc::new(LoggingCommandHandler::new()),
    )?
    .with_options(options);

    let bridge = agent
        .bridge(&config)
        .start()
        .await
        .context("Failed to start kiosk bridge")?;
    info!(addr = %bridge.local_addr(), "Kiosk bridge ready");

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    match agent.handshake(&mut shutdown_rx).await {
        Ok(handshake) => {
            info!(
                rvm_name = ?handshake.rvm_name,
                kiosk_url = ?handshake.kiosk_url,
                "Device registered with backend"
            );
            if let Err(e) = agent.run(&mut shutdown_rx).await {
                error!(error = %e, "Control loop failed");
            }
        }
        Err(EdgeError::ShuttingDown) => info!("Shutdown requested before handshake completed"),
        Err(e) if e.is_config_error() => error!(
            error = %e,
            "Backend rejected the device; check server.base_url and server.api_key"
        ),
        Err(e) => error!(error = %e, "Handshake failed"),
    }

    if let Err(e) = bridge.shutdown().await {
        warn!(error = %e, "Kiosk bridge did not stop cleanly");
    }
    db.close().await;

    info!("Edge agent stopped");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=rvm_edge=trace` - Show trace for the edge runtime only
/// - Default: INFO, or DEBUG with `--verbose`
fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "debug,sqlx=warn"
    } else {
        "info,rvm=debug,sqlx=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping edge agent");
}
