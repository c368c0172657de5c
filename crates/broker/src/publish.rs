//! Event publishing.

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel};

use crate::error::BrokerError;
use crate::topology::EXCHANGE;

/// Something that can deliver a serialized event to the broker.
///
/// The relay is written against this seam so its batch semantics are testable
/// with an in-memory implementation; production wiring uses
/// [`ChannelPublisher`].
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `payload` routed by `event_type`.
    async fn publish(&self, event_type: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

/// Publishes persistent JSON messages over an AMQP channel, awaiting the
/// broker's confirm for each.
pub struct ChannelPublisher {
    channel: Channel,
}

impl ChannelPublisher {
    /// Wraps a channel that already has publisher confirms enabled.
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, event_type: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let confirm = self
            .channel
            .basic_publish(
                EXCHANGE,
                event_type,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await?;

        match confirm.await? {
            Confirmation::Nack(_) => Err(BrokerError::PublishNacked {
                event_type: event_type.to_string(),
            }),
            _ => Ok(()),
        }
    }
}
