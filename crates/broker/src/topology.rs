//! Exchange and queue declarations.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};

use crate::error::BrokerError;

/// The durable direct exchange shared by all event types.
pub const EXCHANGE: &str = "acme.events";

/// Fanout exchange receiving every dead-lettered message.
pub const DEAD_LETTER_EXCHANGE: &str = "acme.events.dlx";

/// Parking queue for dead-lettered messages.
pub const DEAD_LETTER_QUEUE: &str = "q.dead-letter";

fn durable() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

/// Declares the exchanges and the dead-letter parking queue.
///
/// Declarations are idempotent, so every process re-asserts the topology on
/// connect rather than assuming a provisioning step ran first.
pub async fn declare(channel: &Channel) -> Result<(), BrokerError> {
    channel
        .exchange_declare(EXCHANGE, ExchangeKind::Direct, durable(), FieldTable::default())
        .await?;

    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Fanout,
            durable(),
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(
            DEAD_LETTER_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            DEAD_LETTER_QUEUE,
            DEAD_LETTER_EXCHANGE,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

/// Declares a durable consumer queue bound to the exchange by an exact-match
/// routing key, with rejected messages routed to the dead-letter exchange.
pub async fn declare_bound_queue(
    channel: &Channel,
    queue: &str,
    routing_key: &str,
) -> Result<(), BrokerError> {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
    );

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await?;
    channel
        .queue_bind(
            queue,
            EXCHANGE,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}
