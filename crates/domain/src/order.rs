//! Order state machine and value types.

use common::{OrderId, Sku};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// placed ──┬──► reserved ──┬──► paid
///          │               └──► payment_failed
///          └──► out_of_stock
/// ```
///
/// `out_of_stock`, `paid`, and `payment_failed` are terminal; no transition
/// leads out of them. Handlers never inspect the status to deduplicate a
/// redelivery — that is the idempotency ledger's job — the state machine only
/// guards causal preconditions (payment follows a successful reservation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted by the intake endpoint, awaiting stock reservation.
    #[default]
    Placed,

    /// Inventory has been reserved, awaiting payment.
    Reserved,

    /// Reservation failed for insufficient stock (terminal).
    OutOfStock,

    /// Payment confirmed (terminal).
    Paid,

    /// Payment was declined (terminal).
    PaymentFailed,
}

impl OrderStatus {
    /// Returns true if this is a terminal state (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::OutOfStock | OrderStatus::Paid | OrderStatus::PaymentFailed
        )
    }

    /// Returns true if the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Placed, OrderStatus::Reserved)
                | (OrderStatus::Placed, OrderStatus::OutOfStock)
                | (OrderStatus::Reserved, OrderStatus::Paid)
                | (OrderStatus::Reserved, OrderStatus::PaymentFailed)
        )
    }

    /// Validates the transition to `next`, returning it on success.
    pub fn transition(&self, next: OrderStatus) -> Result<OrderStatus, OrderError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(OrderError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Returns the status name as persisted in the `orders` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Reserved => "reserved",
            OrderStatus::OutOfStock => "out_of_stock",
            OrderStatus::Paid => "paid",
            OrderStatus::PaymentFailed => "payment_failed",
        }
    }

    /// Parses a persisted status string.
    pub fn parse(s: &str) -> Result<Self, OrderError> {
        match s {
            "placed" => Ok(OrderStatus::Placed),
            "reserved" => Ok(OrderStatus::Reserved),
            "out_of_stock" => Ok(OrderStatus::OutOfStock),
            "paid" => Ok(OrderStatus::Paid),
            "payment_failed" => Ok(OrderStatus::PaymentFailed),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A monetary amount in integer cents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates an amount from integer cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Zero amount.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Saturating addition.
    pub fn add(&self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    /// Saturating multiplication by a quantity.
    pub fn times(&self, qty: i64) -> Money {
        Money(self.0.saturating_mul(qty))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }
}

/// One (sku, quantity) pair of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: Sku,
    pub qty: i32,
}

impl LineItem {
    /// Creates a line item, rejecting non-positive quantities.
    pub fn new(sku: impl Into<Sku>, qty: i32) -> Result<Self, OrderError> {
        let sku = sku.into();
        if qty <= 0 {
            return Err(OrderError::InvalidQuantity { sku, qty });
        }
        Ok(Self { sku, qty })
    }
}

/// An order row as each service sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: String,
    pub email: String,
    pub status: OrderStatus,
    pub total: Money,
}
