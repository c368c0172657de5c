//! Typed event payloads.
//!
//! Every message crossing the broker is one of a closed set of payload
//! shapes, keyed by the `event_type` routing key and tagged with a schema
//! version in the outbox row. Consumers decode by the routing key they bound
//! to, so an unexpected shape is a permanent rejection rather than a guess.

use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::error::EventDecodeError;
use crate::order::{LineItem, Money};

/// Routing key for an accepted order.
pub const ORDER_PLACED: &str = "order.placed";
/// Routing key for a successful stock reservation.
pub const INVENTORY_RESERVED: &str = "inventory.reserved";
/// Routing key for a reservation aborted on insufficient stock.
pub const ORDER_OUT_OF_STOCK: &str = "order.out_of_stock";
/// Routing key for a confirmed payment.
pub const PAYMENT_COMPLETED: &str = "payment.completed";
/// Routing key for a declined payment.
pub const PAYMENT_FAILED: &str = "payment.failed";

/// Emitted by the intake endpoint when an order is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub customer_id: String,
    pub email: String,
    pub items: Vec<LineItem>,
    pub total_cents: Money,
}

/// Emitted by the inventory service when every line item was reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReserved {
    pub order_id: OrderId,
}

/// Emitted by the inventory service when stock was insufficient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOutOfStock {
    pub order_id: OrderId,
    pub reason: String,
}

/// Emitted by the payment service on a successful charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub order_id: OrderId,
}

/// Emitted by the payment service on a declined charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub order_id: OrderId,
    pub reason: String,
}

/// The closed union of events flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    OrderPlaced(OrderPlaced),
    InventoryReserved(InventoryReserved),
    OrderOutOfStock(OrderOutOfStock),
    PaymentCompleted(PaymentCompleted),
    PaymentFailed(PaymentFailed),
}

impl DomainEvent {
    /// The routing key this event is published under.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::OrderPlaced(_) => ORDER_PLACED,
            DomainEvent::InventoryReserved(_) => INVENTORY_RESERVED,
            DomainEvent::OrderOutOfStock(_) => ORDER_OUT_OF_STOCK,
            DomainEvent::PaymentCompleted(_) => PAYMENT_COMPLETED,
            DomainEvent::PaymentFailed(_) => PAYMENT_FAILED,
        }
    }

    /// Schema version recorded alongside the payload in the outbox.
    pub fn schema_version(&self) -> i32 {
        1
    }

    /// The domain correlation id: one order id threads the whole lifecycle
    /// and keys the idempotency ledger.
    pub fn order_id(&self) -> OrderId {
        match self {
            DomainEvent::OrderPlaced(e) => e.order_id,
            DomainEvent::InventoryReserved(e) => e.order_id,
            DomainEvent::OrderOutOfStock(e) => e.order_id,
            DomainEvent::PaymentCompleted(e) => e.order_id,
            DomainEvent::PaymentFailed(e) => e.order_id,
        }
    }

    /// Serializes the payload to the JSON document stored in the outbox and
    /// published to the broker.
    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            DomainEvent::OrderPlaced(e) => serde_json::to_value(e),
            DomainEvent::InventoryReserved(e) => serde_json::to_value(e),
            DomainEvent::OrderOutOfStock(e) => serde_json::to_value(e),
            DomainEvent::PaymentCompleted(e) => serde_json::to_value(e),
            DomainEvent::PaymentFailed(e) => serde_json::to_value(e),
        }
    }

    /// Decodes a message body received under `event_type`.
    pub fn decode(event_type: &str, body: &[u8]) -> Result<Self, EventDecodeError> {
        let malformed = |source| EventDecodeError::Malformed {
            event_type: event_type.to_string(),
            source,
        };
        match event_type {
            ORDER_PLACED => serde_json::from_slice(body)
                .map(DomainEvent::OrderPlaced)
                .map_err(malformed),
            INVENTORY_RESERVED => serde_json::from_slice(body)
                .map(DomainEvent::InventoryReserved)
                .map_err(malformed),
            ORDER_OUT_OF_STOCK => serde_json::from_slice(body)
                .map(DomainEvent::OrderOutOfStock)
                .map_err(malformed),
            PAYMENT_COMPLETED => serde_json::from_slice(body)
                .map(DomainEvent::PaymentCompleted)
                .map_err(malformed),
            PAYMENT_FAILED => serde_json::from_slice(body)
                .map(DomainEvent::PaymentFailed)
                .map_err(malformed),
            other => Err(EventDecodeError::UnknownEventType(other.to_string())),
        }
    }
}
