// broker/amqp.rs
use super::{BrokerError, Channel, Connector};
use crate::config::BrokerSettings;
use async_trait::async_trait;
use lapin::{
    BasicProperties, Connection, ConnectionProperties,
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    uri::{AMQPAuthority, AMQPUri, AMQPUserInfo},
};

/// RabbitMQ connector. Publishes through the default exchange, routed by queue name.
pub struct AmqpConnector {
    uri: AMQPUri,
}

impl AmqpConnector {
    pub fn new(settings: &BrokerSettings) -> Self {
        let uri = AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: settings.username.clone(),
                    password: settings.password.clone(),
                },
                host: settings.host.clone(),
                port: settings.port,
            },
            vhost: settings.vhost.clone(),
            ..Default::default()
        };
        Self { uri }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>, BrokerError> {
        let connection = Connection::connect_uri(self.uri.clone(), ConnectionProperties::default())
            .await
            .map_err(classify)?;
        let channel = connection.create_channel().await.map_err(classify)?;
        Ok(Box::new(AmqpChannel {
            connection,
            channel,
        }))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.connection.status().connected() {
            return Err(BrokerError::NotConnected);
        }

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(classify)?
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn classify(err: lapin::Error) -> BrokerError {
    match err {
        lapin::Error::IOError(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::InvalidChannelState(_)
        | lapin::Error::MissingHeartbeatError => BrokerError::ConnectionLost(Box::new(err)),
        err => BrokerError::Rejected(Box::new(err)),
    }
}
