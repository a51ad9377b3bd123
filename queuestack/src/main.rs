//! queuestack - in-memory SQS-compatible message queue broker
//!
//! Speaks both the SQS Query and JSON protocols, so the AWS SDKs and CLI can
//! be pointed at it for local development and testing.

mod config;
mod router;

use anyhow::Context;
use clap::Parser;
use queuestack_core::{Clock, SystemClock};
use queuestack_sqs::{QueueConfig, QueueStore, StoreConfig, VisibilityScheduler};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "queuestack")]
#[command(about = "In-memory SQS-compatible message queue broker", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "QUEUESTACK_PORT")]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "QUEUESTACK_HOST")]
    host: Option<String>,

    /// Public base URL used in queue URLs
    #[arg(long, env = "QUEUESTACK_HOSTNAME")]
    hostname: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "QUEUESTACK_CONFIG")]
    config: Option<PathBuf>,

    /// How often timed-out messages are returned to their queues
    #[arg(long, env = "QUEUESTACK_SWEEP_INTERVAL_MS")]
    sweep_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "QUEUESTACK_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "queuestack={level},queuestack_sqs={level},tower_http=debug",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(hostname) = args.hostname {
        config.server.hostname = Some(hostname);
    }
    if let Some(interval) = args.sweep_interval_ms {
        config.broker.sweep_interval_ms = interval;
    }

    info!("Starting queuestack...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(QueueStore::new(
        StoreConfig {
            base_url: config.base_url(),
            account_id: config.broker.account_id.clone(),
            region: config.broker.region.clone(),
        },
        clock,
    ));

    for name in &config.broker.queues {
        store
            .create_queue(name, QueueConfig::for_queue_name(name))
            .with_context(|| format!("creating startup queue '{name}'"))?;
    }

    let stop_sweeper = Arc::new(Notify::new());
    let sweeper = {
        let stop = stop_sweeper.clone();
        VisibilityScheduler::new(
            store.clone(),
            Duration::from_millis(config.broker.sweep_interval_ms),
        )
        .spawn(async move { stop.notified().await })
    };

    // Create router
    let app = router::create_router(router::AppState::new(store));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on http://{}", addr);
    info!("Queue URLs use {}", config.base_url());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    stop_sweeper.notify_one();
    sweeper.await?;
    info!("queuestack stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
