//! Notification handler and notifier collaborator.
//!
//! The pipeline leaf: it consumes the terminal events, sends an email, and
//! marks the ledger — it never produces further outbox rows.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use broker::QueueBinding;
use domain::{DomainEvent, events};
use sqlx::PgConnection;
use storage::orders;

use crate::runtime::{EventHandler, HandlerError};

/// Ledger identity of the notification service.
pub const SERVICE_NAME: &str = "notification-service";

const BINDINGS: &[QueueBinding] = &[
    QueueBinding {
        queue: "q.notification.payment-completed",
        event_type: events::PAYMENT_COMPLETED,
    },
    QueueBinding {
        queue: "q.notification.payment-failed",
        event_type: events::PAYMENT_FAILED,
    },
    QueueBinding {
        queue: "q.notification.order-out-of-stock",
        event_type: events::ORDER_OUT_OF_STOCK,
    },
];

/// Opaque notify capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers a message to a contact address.
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<(), HandlerError>;
}

/// Notifier that writes the email to the log instead of sending it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<(), HandlerError> {
        tracing::info!(%to, %subject, %body, "email sent");
        Ok(())
    }
}

/// An email captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<SentEmail>,
    fail_on_notify: bool,
}

/// In-memory notifier for tests.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingNotifier {
    /// Creates a new recording notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail on subsequent notify calls.
    pub fn set_fail_on_notify(&self, fail: bool) {
        self.state.lock().unwrap().fail_on_notify = fail;
    }

    /// Returns the emails captured so far.
    pub fn sent(&self) -> Vec<SentEmail> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<(), HandlerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_on_notify {
            return Err(HandlerError::Retryable("notifier unavailable".to_string()));
        }
        state.sent.push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Emails customers about terminal order outcomes.
pub struct NotificationHandler {
    notifier: Box<dyn Notifier>,
}

impl NotificationHandler {
    /// Creates a handler backed by the given notifier.
    pub fn new(notifier: Box<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
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
        let (order_id, subject, body) = match event {
            DomainEvent::PaymentCompleted(e) => (
                e.order_id,
                "Order Paid",
                format!("Order {} paid successfully.", e.order_id),
            ),
            DomainEvent::PaymentFailed(e) => (
                e.order_id,
                "Payment Failed",
                format!("Order {} payment failed.", e.order_id),
            ),
            DomainEvent::OrderOutOfStock(e) => (
                e.order_id,
                "Out of Stock",
                format!("Order {} is out of stock.", e.order_id),
            ),
            other => {
                return Err(HandlerError::Permanent(format!(
                    "unexpected event type {}",
                    other.event_type()
                )));
            }
        };

        let order = orders::fetch(conn, order_id)
            .await?
            .ok_or_else(|| HandlerError::Permanent(format!("order {order_id} not found")))?;

        self.notifier.notify(&order.email, subject, &body).await?;
        Ok(())
    }
}
