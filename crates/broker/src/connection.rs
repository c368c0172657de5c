//! Resilient broker connection.

use common::Backoff;
use lapin::options::ConfirmSelectOptions;
use lapin::{Channel, Connection, ConnectionProperties};

use crate::error::BrokerError;
use crate::topology;

struct LinkState {
    connection: Connection,
    channel: Channel,
}

/// A broker connection owned by the loop that uses it.
///
/// `acquire` hands out a live channel, reconnecting with unbounded
/// exponential backoff when there is none; `invalidate` tears the handles
/// down so the next `acquire` starts fresh. There is no process-global
/// connection state: each relay or worker loop holds its own link and decides
/// when it is no longer trustworthy.
pub struct BrokerLink {
    uri: String,
    state: Option<LinkState>,
}

impl BrokerLink {
    /// Creates an unconnected link to the given AMQP URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            state: None,
        }
    }

    /// Returns a live channel, connecting (and declaring the topology) first
    /// if necessary. Blocks through connection failures on exponential
    /// backoff; connectivity problems are recovered here, never surfaced.
    pub async fn acquire(&mut self) -> Channel {
        if let Some(state) = &self.state
            && state.channel.status().connected()
        {
            return state.channel.clone();
        }

        let mut backoff = Backoff::for_connect();
        loop {
            match Self::open(&self.uri).await {
                Ok(state) => {
                    tracing::info!("broker ready");
                    let channel = state.channel.clone();
                    self.state = Some(state);
                    return channel;
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %err,
                        retry_in_secs = delay.as_secs(),
                        "broker connect failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Drops the cached handles so the next `acquire` reconnects. Called
    /// after any mid-loop operation fails with a channel or connection error.
    pub async fn invalidate(&mut self) {
        if let Some(state) = self.state.take() {
            let _ = state.channel.close(200, "reconnecting").await;
            let _ = state.connection.close(200, "reconnecting").await;
        }
    }

    async fn open(uri: &str) -> Result<LinkState, BrokerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        // Publisher confirms make a successful publish mean "persisted by the
        // broker", which the outbox relay's PUBLISHED transition relies on.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        topology::declare(&channel).await?;

        Ok(LinkState {
            connection,
            channel,
        })
    }
}
