use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pubgate::config::{PubgateConfig, StoreBackend, DEV_IDENTITY_SALT};
use pubgate::grpc::GrpcServer;
use pubgate::ratelimit::{
    spawn_sweeper, MemoryStore, RateLimitStore, RateLimiter, SqliteStore, SystemClock,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Rate limiting service for Builder's Pub.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "PUBGATE_CONFIG")]
    config: Option<String>,

    /// Override the gRPC listen address
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting pubgate rate limiting service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = PubgateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.grpc_addr {
        config.server.grpc_addr = addr;
    }

    let policies = config.policies()?;
    config.validate(&policies)?;
    info!(
        grpc_addr = %config.server.grpc_addr,
        backend = ?config.store.backend,
        actions = policies.actions.len(),
        "Configuration loaded"
    );

    if config.identity.salt == DEV_IDENTITY_SALT {
        warn!("Using the development identity salt; set identity.salt in production");
    }

    let store: Arc<dyn RateLimitStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.store.sqlite_path)?),
    };

    let rate_limiter = Arc::new(
        RateLimiter::new(Arc::clone(&store))
            .with_policies(policies)
            .with_options(config.rate_limiting.limiter_options())
            .with_max_window(config.rate_limiting.retention_secs),
    );
    info!(
        options = ?rate_limiter.options(),
        store = store.name(),
        max_window_secs = config.rate_limiting.retention_secs,
        "Rate limiter initialized"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(
        Arc::clone(&store),
        Arc::new(SystemClock),
        config.rate_limiting.retention(),
        config.rate_limiting.sweep_interval(),
        shutdown_rx,
    );

    let grpc_server = GrpcServer::new(
        config.server.grpc_addr,
        rate_limiter,
        config.identity.salt.clone(),
    );

    // Run the server with graceful shutdown on Ctrl+C
    let served = grpc_server.serve_with_shutdown(shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    sweeper.await?;
    served?;

    info!("pubgate rate limiting service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
