//! Broker error types.

use thiserror::Error;

/// Errors that can occur against the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// AMQP protocol or connection error.
    #[error("broker error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The broker negatively acknowledged a confirmed publish.
    #[error("broker rejected publish of {event_type}")]
    PublishNacked { event_type: String },
}
