//! Broker plumbing shared by the relay and the workers.
//!
//! One durable direct exchange carries every event type; each consumer owns a
//! durable queue bound by the exact routing key it wants. Rejected messages
//! dead-letter through a fanout exchange into a single parking queue for
//! operator inspection.

pub mod connection;
pub mod consume;
pub mod error;
pub mod publish;
pub mod topology;

pub use connection::BrokerLink;
pub use consume::{DeliveryStream, QueueBinding, consumer_stream};
pub use error::BrokerError;
pub use publish::{ChannelPublisher, EventPublisher};
pub use topology::{DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE, EXCHANGE};
