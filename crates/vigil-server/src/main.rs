//! Vigil Server Binary
//!
//! Serves the `/v1.0` sensor API, runs the ingestion pipeline and the
//! compression job, and snapshots state to the data directory.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use vigil_server::{create_router, AppState, ServerConfig};
use vigil_timeseries::CompressionJob;

#[derive(Parser)]
#[command(name = "vigil-server")]
#[command(about = "Vigil sensor time-series API server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'H', long, env = "VIGIL_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "VIGIL_PORT")]
    port: Option<u16>,

    /// Data directory for snapshots (enables persistence)
    #[arg(short, long, env = "VIGIL_DATA_DIR")]
    data_dir: Option<String>,

    /// Topic namespace readings are published under
    #[arg(long, env = "VIGIL_TOPIC_NAMESPACE")]
    topic_namespace: Option<String>,

    /// Do not start the ingestion pipeline
    #[arg(long)]
    no_ingest: bool,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        tracing::error!(error = %e, "Vigil server failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let base = match args.config {
        Some(ref path) => {
            tracing::info!("Loading configuration from {}", path.display());
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };

    let mut config = base
        .with_host(args.host)
        .with_port(args.port)
        .with_data_dir(args.data_dir)
        .with_topic_namespace(args.topic_namespace);
    if args.no_ingest {
        config = config.with_ingest_enabled(false);
    }
    let addr: SocketAddr = config.socket_addr();

    if let Some(ref data_dir) = config.data_dir {
        tracing::info!("Persistence enabled, data directory: {}", data_dir);
    } else {
        tracing::warn!("No data directory specified, running in-memory only (data will be lost on restart)");
    }

    let state = AppState::new(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = state.start_ingestion();
    let compression = CompressionJob::new(
        state.store.clone(),
        state.config.store.compression_job_interval(),
    )
    .spawn(shutdown_rx.clone());

    // Start periodic save task if persistence is enabled
    let snapshots = if state.persistence_enabled() {
        let state_for_save = state.clone();
        let mut shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(state_for_save.config.snapshot_interval());
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = state_for_save.save_in_background().await {
                            tracing::error!("Failed to save snapshot: {}", e);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }))
    } else {
        None
    };

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Vigil Server listening on http://{}", addr);
    tracing::info!("Sensor API ready at http://{}/v1.0", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down background tasks");
    if let Some(pipeline) = pipeline {
        let health = pipeline.stop().await;
        tracing::info!(
            received = health.received,
            stored = health.stored,
            dropped = health.malformed + health.unresolved + health.duplicates + health.failed + health.lagged,
            "Ingestion pipeline stopped"
        );
    }
    let _ = shutdown_tx.send(true);
    if let Err(e) = compression.await {
        tracing::error!("Compression job failed: {}", e);
    }
    if let Some(task) = snapshots {
        let _ = task.await;
    }

    tracing::info!("Saving snapshot...");
    match state.save_to_disk() {
        Ok(()) if state.persistence_enabled() => tracing::info!("Snapshot saved"),
        Ok(()) => {}
        Err(e) => tracing::error!("Failed to save snapshot on shutdown: {}", e),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}
