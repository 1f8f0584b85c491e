use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewarden::config::{LogFormat, LoggingConfig, RatewardenConfig, StoreBackend};
use ratewarden::http::{HttpServer, RateLimitService};
use ratewarden::ratelimit::RateLimiter;
use ratewarden::store::{LimiterStore, MemoryStore};

/// Per-identifier request admission control.
#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = RatewardenConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }

    init_tracing(&config.logging);

    info!("Starting Ratewarden");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        rate = config.limits.rate,
        block_duration_minutes = config.limits.block_duration_minutes,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    let store = build_store(&config).await?;
    let rate_limiter = Arc::new(RateLimiter::new(store));
    let service = Arc::new(RateLimitService::new(rate_limiter, &config.limits)?);

    HttpServer::new(config.server.listen_addr, service)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Ratewarden stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn build_store(config: &RatewardenConfig) -> anyhow::Result<Arc<dyn LimiterStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            use ratewarden::store::{RedisStore, RedisStoreConfig};

            let store_config = RedisStoreConfig {
                key_prefix: config.store.key_prefix.clone(),
                ttl: config.store.ttl_secs.map(std::time::Duration::from_secs),
            };
            let store =
                RedisStore::connect_with_config(&config.store.redis_url, store_config).await?;
            info!(url = %config.store.redis_url, "Using Redis store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => {
            anyhow::bail!("the redis store backend requires the `redis` feature")
        }
    }
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
