//! Domain error types.

use common::Sku;
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised by order lifecycle rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// The requested status change is not a legal state-machine transition.
    #[error("invalid order status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A persisted status string did not match any known state.
    #[error("unknown order status: {0}")]
    UnknownStatus(String),

    /// A line item carried a non-positive quantity.
    #[error("line item quantity must be positive: {sku} x {qty}")]
    InvalidQuantity { sku: Sku, qty: i32 },
}

/// Errors raised when turning a received message back into a typed event.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The routing key does not name any event this system understands.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The body did not match the schema for its event type.
    #[error("malformed {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}
