//! Payment worker entry point.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workers::handlers::{PaymentHandler, RandomGateway};
use workers::{WorkerConfig, run_worker};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    let handler = PaymentHandler::new(Box::new(RandomGateway::new(config.payment_success_rate)));
    run_worker(&handler, &config).await;
}
