mod handlers;
mod intake;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use futures_util::StreamExt;
use judgebox_common::config::Config;
use judgebox_common::redis::{RedisQueue, RedisStatusLog};
use judgebox_common::types::StatusEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::intake::SubmissionService;

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<SubmissionService>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Judgebox API booting...");
    let config = Config::from_env();

    metrics::init_metrics().context("Failed to register metrics")?;
    info!("Metrics registry initialized");

    let queue = RedisQueue::connect(&config.redis_url, config.queue_name.clone())
        .await
        .context("Failed to connect to Redis")?;
    info!(redis_url = %config.redis_url, queue = %queue.queue_name(), "Connected to queue");

    let status_client = redis::Client::open(config.redis_url.as_str())?;
    let status_conn = redis::aio::ConnectionManager::new(status_client)
        .await
        .context("Failed to connect to Redis")?;
    let status_log = RedisStatusLog::new(
        status_conn,
        config.status_channel.clone(),
        config.status_ttl_secs,
    );

    let intake = Arc::new(SubmissionService::new(Arc::new(queue), Arc::new(status_log)));
    let state = Arc::new(AppState {
        intake: intake.clone(),
    });

    // Apply worker status events to the status map
    tokio::spawn(status_subscriber(
        config.redis_url.clone(),
        config.status_channel.clone(),
        intake,
    ));

    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await
        .context("Server error")?;

    Ok(())
}

/// Background task: subscribe to worker status events and apply them.
/// Reconnects with a fixed delay whenever the subscription drops; anything
/// published in the gap is recovered from the status log on the next poll.
async fn status_subscriber(redis_url: String, channel: String, intake: Arc<SubmissionService>) {
    loop {
        if let Err(e) = subscribe_once(&redis_url, &channel, &intake).await {
            tracing::error!(error = %e, "Status subscription failed");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn subscribe_once(
    redis_url: &str,
    channel: &str,
    intake: &SubmissionService,
) -> anyhow::Result<()> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.subscribe(channel).await?;

    info!(channel, "Status subscriber started - listening for worker events");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(_) => continue,
        };

        let event: StatusEvent = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable status event");
                continue;
            }
        };

        intake.apply(&event).await;

        let tracked = intake.tracked().await;
        tracing::debug!(
            submission_id = %event.submission_id,
            status = %event.status,
            tracked,
            "Applied status event"
        );
    }

    anyhow::bail!("status subscription closed")
}
