//! The idempotent consumer runtime.
//!
//! Wraps a domain handler so that redelivery, duplicate publishing from the
//! relay, or broker-level at-least-once semantics cannot apply its effect
//! twice. Per delivery: decode, open a transaction, check the ledger (hit
//! commits as a no-op), run the handler, write the ledger marker, commit,
//! then acknowledge according to the explicit outcome.

use async_trait::async_trait;
use broker::{BrokerLink, QueueBinding};
use domain::DomainEvent;
use futures_util::StreamExt;
use lapin::Channel;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use sqlx::{PgConnection, PgPool};
use storage::{StorageError, ledger};
use thiserror::Error;

use crate::config::WorkerConfig;

/// Why a handler could not apply a delivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Redelivery cannot help: malformed input, unknown order, or an illegal
    /// state transition. The message is dead-lettered for an operator.
    #[error("permanent rejection: {0}")]
    Permanent(String),

    /// A transient fault (database, downstream collaborator). The message is
    /// retried once, then dead-lettered.
    #[error("retryable failure: {0}")]
    Retryable(String),
}

impl From<StorageError> for HandlerError {
    fn from(err: StorageError) -> Self {
        HandlerError::Retryable(err.to_string())
    }
}

/// Outcome of processing one delivery.
///
/// The consumer loop maps this onto the broker acknowledgement: `Applied` and
/// `Duplicate` ack; `RejectedPermanent` dead-letters immediately;
/// `RejectedRetryable` requeues the first delivery and dead-letters a
/// redelivery. A handler failure therefore never silently drops the event
/// and never loops forever on a poison message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The business effect was committed together with the ledger marker.
    Applied,
    /// The ledger already held a marker; the transaction committed as a
    /// no-op.
    Duplicate,
    /// Rejected for good; routed to the dead-letter queue.
    RejectedPermanent,
    /// Rolled back on a transient fault; eligible for one redelivery.
    RejectedRetryable,
}

/// A domain handler wrapped by the runtime.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The service identity recorded in the idempotency ledger.
    fn service_name(&self) -> &'static str;

    /// The queues this service consumes and the event types bound to them.
    fn bindings(&self) -> &'static [QueueBinding];

    /// Applies the event's business effect inside the runtime's transaction.
    ///
    /// The handler may read and write business rows and insert new outbox
    /// rows; everything commits or rolls back with the ledger marker.
    async fn handle(
        &self,
        conn: &mut PgConnection,
        event: &DomainEvent,
    ) -> Result<(), HandlerError>;
}

/// Runs one delivery through the dedup-transact-mark sequence.
#[tracing::instrument(skip(pool, handler, body), fields(service = handler.service_name()))]
pub async fn process_delivery(
    pool: &PgPool,
    handler: &dyn EventHandler,
    event_type: &str,
    body: &[u8],
) -> Outcome {
    let event = match DomainEvent::decode(event_type, body) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "undecodable delivery");
            metrics::counter!("consumer_rejected_total").increment(1);
            return Outcome::RejectedPermanent;
        }
    };
    let order_id = event.order_id();
    let service = handler.service_name();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            tracing::warn!(error = %err, "failed to open transaction");
            return Outcome::RejectedRetryable;
        }
    };

    match ledger::is_processed(&mut *tx, service, order_id).await {
        Ok(true) => {
            return match tx.commit().await {
                Ok(()) => {
                    tracing::debug!(%order_id, "skip already processed");
                    metrics::counter!("consumer_duplicates_total").increment(1);
                    Outcome::Duplicate
                }
                Err(err) => {
                    tracing::warn!(error = %err, "no-op commit failed");
                    Outcome::RejectedRetryable
                }
            };
        }
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(error = %err, "ledger check failed");
            let _ = tx.rollback().await;
            return Outcome::RejectedRetryable;
        }
    }

    if let Err(err) = handler.handle(&mut *tx, &event).await {
        let _ = tx.rollback().await;
        metrics::counter!("consumer_rejected_total").increment(1);
        return match err {
            HandlerError::Permanent(reason) => {
                tracing::error!(%order_id, %reason, "permanently rejected");
                Outcome::RejectedPermanent
            }
            HandlerError::Retryable(reason) => {
                tracing::warn!(%order_id, %reason, "handler failed; rolled back");
                Outcome::RejectedRetryable
            }
        };
    }

    if let Err(err) = ledger::mark_processed(&mut *tx, service, order_id).await {
        tracing::warn!(error = %err, "ledger marker failed");
        let _ = tx.rollback().await;
        return Outcome::RejectedRetryable;
    }

    match tx.commit().await {
        Ok(()) => {
            metrics::counter!("consumer_applied_total").increment(1);
            Outcome::Applied
        }
        Err(err) => {
            tracing::warn!(error = %err, "commit failed");
            Outcome::RejectedRetryable
        }
    }
}

async fn acknowledge(delivery: &Delivery, outcome: Outcome) -> Result<(), lapin::Error> {
    match outcome {
        Outcome::Applied | Outcome::Duplicate => delivery.ack(BasicAckOptions::default()).await,
        Outcome::RejectedPermanent => {
            delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await
        }
        Outcome::RejectedRetryable => {
            // One immediate retry; a redelivered message that fails again is
            // parked on the dead-letter queue instead of looping.
            delivery
                .nack(BasicNackOptions {
                    requeue: !delivery.redelivered,
                    ..Default::default()
                })
                .await
        }
    }
}

async fn serve(
    channel: &Channel,
    handler: &dyn EventHandler,
    pool: &PgPool,
    config: &WorkerConfig,
) -> Result<(), broker::BrokerError> {
    let mut deliveries = broker::consumer_stream(
        channel,
        handler.service_name(),
        handler.bindings(),
        config.prefetch,
    )
    .await?;

    tracing::info!(service = handler.service_name(), "listening");

    while let Some(delivery) = deliveries.next().await {
        let delivery = delivery?;
        let event_type = delivery.routing_key.as_str().to_string();
        let outcome = process_delivery(pool, handler, &event_type, &delivery.data).await;
        acknowledge(&delivery, outcome).await?;
    }

    Ok(())
}

/// Runs a worker's consumer loop forever.
///
/// Connects to the database and the broker with retry, then processes
/// deliveries until the channel fails, at which point the link is invalidated
/// and reacquired. The process never exits on connectivity failure.
pub async fn run_worker(handler: &dyn EventHandler, config: &WorkerConfig) {
    let pool = storage::connect_with_retry(&config.database_url).await;
    let mut link = BrokerLink::new(config.rabbitmq_url.clone());

    loop {
        let channel = link.acquire().await;
        match serve(&channel, handler, &pool, config).await {
            Ok(()) => tracing::warn!("delivery stream ended; reconnecting"),
            Err(err) => tracing::warn!(error = %err, "consumer loop failed; reconnecting"),
        }
        link.invalidate().await;
    }
}
