//! Consumer subscriptions.

use std::pin::Pin;

use futures_util::stream::{SelectAll, select_all};
use lapin::Channel;
use lapin::Consumer;
use lapin::options::{BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;

use crate::error::BrokerError;
use crate::topology;

/// A queue a consumer owns and the event type bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: &'static str,
    pub event_type: &'static str,
}

/// Deliveries from every queue a service consumes, merged into one stream.
pub type DeliveryStream = SelectAll<Pin<Box<Consumer>>>;

/// Declares the service's queues and opens a merged delivery stream over
/// them.
///
/// `prefetch` bounds the unacknowledged deliveries in flight on this channel,
/// which is the consumer's backpressure: the broker stops sending once the
/// limit is reached until something is acked or nacked.
pub async fn consumer_stream(
    channel: &Channel,
    consumer_tag: &str,
    bindings: &[QueueBinding],
    prefetch: u16,
) -> Result<DeliveryStream, BrokerError> {
    channel
        .basic_qos(prefetch, BasicQosOptions::default())
        .await?;

    let mut consumers = Vec::with_capacity(bindings.len());
    for binding in bindings {
        topology::declare_bound_queue(channel, binding.queue, binding.event_type).await?;
        let consumer = channel
            .basic_consume(
                binding.queue,
                &format!("{consumer_tag}.{}", binding.queue),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        consumers.push(Box::pin(consumer));
    }

    Ok(select_all(consumers))
}
