//! Notification worker entry point.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workers::handlers::{LogNotifier, NotificationHandler};
use workers::{WorkerConfig, run_worker};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    let handler = NotificationHandler::new(Box::new(LogNotifier));
    run_worker(&handler, &config).await;
}
