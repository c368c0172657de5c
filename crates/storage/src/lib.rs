//! Postgres data access for the fulfillment pipeline.
//!
//! Every function takes a `&mut PgConnection` so callers compose reads and
//! writes inside a single transaction: the outbox insert, the ledger marker,
//! and the business mutation commit or roll back together.

pub mod connect;
pub mod error;
pub mod ledger;
pub mod orders;
pub mod outbox;
pub mod products;

pub use connect::{connect_with_retry, run_migrations};
pub use error::{Result, StorageError};
pub use orders::NewOrder;
pub use outbox::{ClaimedEvent, OutboxEvent, OutboxStatus};
pub use products::Product;
