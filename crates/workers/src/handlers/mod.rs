//! Per-service business logic built on the consumer runtime.

pub mod inventory;
pub mod notification;
pub mod payment;

pub use inventory::InventoryHandler;
pub use notification::{LogNotifier, NotificationHandler, Notifier, RecordingNotifier, SentEmail};
pub use payment::{ChargeOutcome, FixedGateway, PaymentGateway, PaymentHandler, RandomGateway};
