//! Domain layer: the order lifecycle state machine and the typed event
//! payloads carried through the outbox and the broker.

pub mod error;
pub mod events;
pub mod order;

pub use error::{EventDecodeError, OrderError};
pub use events::{
    DomainEvent, InventoryReserved, OrderOutOfStock, OrderPlaced, PaymentCompleted, PaymentFailed,
};
pub use order::{LineItem, Money, Order, OrderStatus};
