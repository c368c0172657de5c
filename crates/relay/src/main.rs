//! Outbox relay entry point.

use relay::{OutboxRelay, RelayConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env();
    let pool = storage::connect_with_retry(&config.database_url).await;

    tracing::info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        batch_limit = config.batch_limit,
        max_attempts = config.max_attempts,
        "outbox relay starting"
    );

    OutboxRelay::new(pool, config).run().await;
}
