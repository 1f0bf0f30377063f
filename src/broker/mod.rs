// broker/mod.rs
mod amqp;
#[cfg(test)]
pub mod testing;

pub use amqp::AmqpConnector;

use crate::{
    metrics,
    models::{Envelope, HouseId},
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::ser::Formatter;
use std::{collections::BTreeMap, fmt, io, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{Mutex, watch},
    time::timeout,
};
use tracing::{debug, error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection lost: {0}")]
    ConnectionLost(#[source] BoxError),
    #[error("Not connected to the broker")]
    NotConnected,
    #[error("Timed out after {0:?} while connecting to the broker")]
    Timeout(Duration),
    #[error("Broker rejected the operation: {0}")]
    Rejected(#[source] BoxError),
    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BrokerError {
    /// Errors after which the connection can no longer be used.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_) | Self::NotConnected | Self::Timeout(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("{}", unknown_house(.0))]
    UnknownHouse(Option<HouseId>),
    #[error("Failed to publish to queue {queue}: {source}")]
    Failed {
        queue: String,
        #[source]
        source: BrokerError,
    },
}

fn unknown_house(house: &Option<HouseId>) -> String {
    match house {
        Some(house) => format!("No queue is bound to house {house}"),
        None => "Bulb does not belong to any house".to_string(),
    }
}

impl PublishError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownHouse(_) => "unknown_house",
            Self::Failed { .. } => "publish_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub house: HouseId,
    pub queue: String,
    pub reconnected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

/// JSON with `", "` and `": "` separators, the layout house agents already parse.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut payload = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut payload, SpacedFormatter);
    message.serialize(&mut serializer)?;
    Ok(payload)
}

/// Opens broker sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Channel>, BrokerError>;
}

/// A live broker session able to declare queues and publish to them.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

struct Link {
    channel: Option<Box<dyn Channel>>,
}

/// Publishes envelopes to per-house queues over a single broker connection.
///
/// Every publish holds the connection lock for its whole duration, including the
/// reconnect and the retry, so concurrent callers never race on a half-open session.
/// A publish that hits a lost connection reconnects once, re-declares every house
/// queue and retries once; a second failure is returned to the caller.
pub struct Publisher {
    connector: Box<dyn Connector>,
    queues: BTreeMap<HouseId, String>,
    connect_timeout: Duration,
    link: Mutex<Link>,
    state: watch::Sender<ConnectionState>,
}

impl Publisher {
    pub fn new(
        connector: impl Connector + 'static,
        queue_prefix: &str,
        houses: impl IntoIterator<Item = HouseId>,
        connect_timeout: Duration,
    ) -> Self {
        let queues = houses
            .into_iter()
            .map(|house| (house, Self::queue_name(queue_prefix, house)))
            .collect();

        Self {
            connector: Box::new(connector),
            queues,
            connect_timeout,
            link: Mutex::new(Link { channel: None }),
            state: watch::Sender::new(ConnectionState::Connecting),
        }
    }

    pub fn queue_name(prefix: &str, house: HouseId) -> String {
        format!("{prefix}_house_{house}")
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Opens the initial connection and declares all house queues.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        let mut link = self.link.lock().await;
        self.establish(&mut link).await
    }

    pub async fn publish(
        &self,
        envelope: &Envelope,
        house: Option<HouseId>,
    ) -> Result<Delivery, PublishError> {
        let Some((house, queue)) = house.and_then(|house| Some((house, self.queues.get(&house)?))) else {
            warn!(bulb = envelope.id, ?house, "No queue bound for bulb, command not sent");
            return Err(PublishError::UnknownHouse(house));
        };
        let failed = |source: BrokerError| PublishError::Failed {
            queue: queue.clone(),
            source,
        };
        let payload = encode(envelope).map_err(|err| failed(err.into()))?;

        let mut link = self.link.lock().await;
        match Self::send(&link, queue, &payload).await {
            Ok(()) => {
                debug!(queue = %queue, bulb = envelope.id, "Published control instruction");
                return Ok(Delivery {
                    house,
                    queue: queue.clone(),
                    reconnected: false,
                });
            }
            Err(err) if err.is_connection_lost() => {
                warn!(queue = %queue, error = %err, "Connection to broker lost, attempting to reconnect");
                link.channel = None;
                self.state.send_replace(ConnectionState::Disconnected);
            }
            Err(err) => {
                error!(queue = %queue, error = %err, "Error sending broker message");
                return Err(failed(err));
            }
        }

        let reconnect = self.establish(&mut link).await;
        metrics::record_reconnect(reconnect.is_ok());
        reconnect.map_err(failed)?;

        match Self::send(&link, queue, &payload).await {
            Ok(()) => {
                info!(queue = %queue, bulb = envelope.id, "Published control instruction after reconnect");
                Ok(Delivery {
                    house,
                    queue: queue.clone(),
                    reconnected: true,
                })
            }
            Err(err) => {
                if err.is_connection_lost() {
                    link.channel = None;
                    self.state.send_replace(ConnectionState::Disconnected);
                }
                error!(queue = %queue, error = %err, "Retry after reconnect failed");
                Err(failed(err))
            }
        }
    }

    async fn send(link: &Link, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        match &link.channel {
            Some(channel) => channel.publish(queue, payload).await,
            None => Err(BrokerError::NotConnected),
        }
    }

    async fn establish(&self, link: &mut Link) -> Result<(), BrokerError> {
        link.channel = None;
        self.state.send_replace(ConnectionState::Connecting);

        let attempt = async {
            let channel = self.connector.connect().await?;
            for queue in self.queues.values() {
                channel.declare_queue(queue).await?;
                debug!(queue = %queue, "Declared queue");
            }
            Ok::<_, BrokerError>(channel)
        };

        let result = match timeout(self.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(self.connect_timeout)),
        };

        match result {
            Ok(channel) => {
                link.channel = Some(channel);
                self.state.send_replace(ConnectionState::Connected);
                info!(queues = self.queues.len(), "Connected to broker");
                Ok(())
            }
            Err(err) => {
                self.state.send_replace(ConnectionState::Disconnected);
                error!(error = %err, "Error connecting to broker");
                Err(err)
            }
        }
    }
}
