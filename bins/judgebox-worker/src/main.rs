mod container;
mod dispatch;
mod engine;
mod local;
mod reporter;
mod runtime;
mod server;

use anyhow::Context;
use judgebox_common::config::{Config, ExecutionBackend};
use judgebox_common::queue::JobQueue;
use judgebox_common::redis::{RedisQueue, RedisStatusLog};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::engine::{DockerEngine, ExecutionEngine};
use crate::local::LocalEngine;
use crate::reporter::LogReporter;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

async fn build_engine(config: &Config) -> anyhow::Result<Arc<dyn ExecutionEngine>> {
    match config.execution_backend {
        ExecutionBackend::Docker => {
            let engine = DockerEngine::connect(config).context("Failed to connect to Docker daemon")?;
            engine.ping().await.context("Docker daemon did not answer ping")?;
            info!(
                memory_limit_mb = config.memory_limit_mb,
                cpu_limit = config.cpu_limit,
                pids_limit = config.pids_limit,
                max_concurrent_containers = config.max_concurrent_containers,
                "Docker engine ready"
            );
            if config.prewarm_images {
                engine.prewarm().await;
            }
            Ok(Arc::new(engine))
        }
        ExecutionBackend::Local => {
            tracing::warn!("Local execution backend selected: submissions run WITHOUT isolation");
            Ok(Arc::new(LocalEngine::new(
                config.execution_timeout(),
                config.max_output_bytes,
            )))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Judgebox worker booting...");
    let config = Config::from_env();

    let engine = build_engine(&config).await?;

    let queue = Arc::new(
        RedisQueue::connect(&config.redis_url, config.queue_name.clone())
            .await
            .context("Failed to connect to Redis")?,
    );
    info!(redis_url = %config.redis_url, queue = %queue.queue_name(), "Connected to queue");

    let client = redis::Client::open(config.redis_url.as_str())?;
    let status_conn = redis::aio::ConnectionManager::new(client).await?;
    let status_log = RedisStatusLog::new(
        status_conn,
        config.status_channel.clone(),
        config.status_ttl_secs,
    );
    let reporter = Arc::new(LogReporter::new(Arc::new(status_log)));

    let dispatcher = Dispatcher::new(
        queue.clone(),
        engine.clone(),
        reporter,
        config.dequeue_timeout(),
        config.queue_retry_delay(),
    );

    let addr = format!("0.0.0.0:{}", config.worker_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("HTTP server listening on {}", addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, server::routes(engine))
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, finishing current job...");
        }
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await;

    queue.close().await;
    server.await?.context("HTTP server error")?;

    info!("Worker shutdown complete");
    Ok(())
}
