//! Payment handler and gateway collaborator.

use async_trait::async_trait;
use broker::QueueBinding;
use domain::{DomainEvent, Order, OrderStatus, PaymentCompleted, PaymentFailed, events};
use rand::Rng;
use sqlx::PgConnection;
use storage::{orders, outbox};

use crate::runtime::{EventHandler, HandlerError};

/// Ledger identity of the payment service.
pub const SERVICE_NAME: &str = "payment-service";

const BINDINGS: &[QueueBinding] = &[QueueBinding {
    queue: "q.payment.inventory-reserved",
    event_type: events::INVENTORY_RESERVED,
}];

/// Decision returned by a charge attempt.
///
/// A decline is a valid business outcome, not an error: it becomes the
/// order's terminal `payment_failed` state and its own event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved,
    Declined { reason: String },
}

/// Trait for the external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Attempts to charge the order's total.
    async fn charge(&self, order: &Order) -> Result<ChargeOutcome, HandlerError>;
}

/// Simulated gateway approving with a configured probability.
pub struct RandomGateway {
    success_rate: f64,
}

impl RandomGateway {
    /// Creates a gateway approving with probability `success_rate`,
    /// clamped to [0, 1].
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl PaymentGateway for RandomGateway {
    async fn charge(&self, _order: &Order) -> Result<ChargeOutcome, HandlerError> {
        let approved = rand::thread_rng().gen_bool(self.success_rate);
        Ok(if approved {
            ChargeOutcome::Approved
        } else {
            ChargeOutcome::Declined {
                reason: "card_declined".to_string(),
            }
        })
    }
}

/// Gateway with a predetermined answer, for tests.
pub struct FixedGateway {
    outcome: ChargeOutcome,
}

impl FixedGateway {
    /// A gateway that approves every charge.
    pub fn approving() -> Self {
        Self {
            outcome: ChargeOutcome::Approved,
        }
    }

    /// A gateway that declines every charge with the given reason.
    pub fn declining(reason: impl Into<String>) -> Self {
        Self {
            outcome: ChargeOutcome::Declined {
                reason: reason.into(),
            },
        }
    }
}

#[async_trait]
impl PaymentGateway for FixedGateway {
    async fn charge(&self, _order: &Order) -> Result<ChargeOutcome, HandlerError> {
        Ok(self.outcome.clone())
    }
}

/// Charges reserved orders and records the outcome.
pub struct PaymentHandler {
    gateway: Box<dyn PaymentGateway>,
}

impl PaymentHandler {
    /// Creates a handler backed by the given gateway.
    pub fn new(gateway: Box<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl EventHandler for PaymentHandler {
    fn service_name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn bindings(&self) -> &'static [QueueBinding] {
        BINDINGS
    }

    async fn handle(
        &self,
        conn: &mut PgConnection,
        event: &DomainEvent,
    ) -> Result<(), HandlerError> {
        let DomainEvent::InventoryReserved(reserved) = event else {
            return Err(HandlerError::Permanent(format!(
                "unexpected event type {}",
                event.event_type()
            )));
        };

        let order = orders::fetch(conn, reserved.order_id).await?.ok_or_else(|| {
            HandlerError::Permanent(format!("order {} not found", reserved.order_id))
        })?;

        // Causal precondition: payment only proceeds from a reserved order.
        order
            .status
            .transition(OrderStatus::Paid)
            .map_err(|err| HandlerError::Permanent(err.to_string()))?;

        match self.gateway.charge(&order).await? {
            ChargeOutcome::Approved => {
                orders::set_status(conn, order.id, OrderStatus::Paid).await?;
                outbox::insert(
                    conn,
                    &DomainEvent::PaymentCompleted(PaymentCompleted { order_id: order.id }),
                )
                .await?;
                tracing::info!(order_id = %order.id, "payment completed");
            }
            ChargeOutcome::Declined { reason } => {
                orders::set_status(conn, order.id, OrderStatus::PaymentFailed).await?;
                outbox::insert(
                    conn,
                    &DomainEvent::PaymentFailed(PaymentFailed {
                        order_id: order.id,
                        reason: reason.clone(),
                    }),
                )
                .await?;
                tracing::info!(order_id = %order.id, %reason, "payment failed");
            }
        }

        Ok(())
    }
}
