use async_trait::async_trait;
use lapin::options::{
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use shared::protocol::PERSISTENT_DELIVERY_MODE;
use crate::broker::{Broker, Connector};
use crate::config::BrokerConfig;
use crate::error::{BrokerConnectError, BrokerError, PublishError};
use crate::topology::{Binding, ExchangeDescriptor, ExchangeKind, QueueDescriptor};

/// AMQP 0-9-1 session: one connection, one channel.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(&self, exchange: &ExchangeDescriptor) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                &exchange.name,
                exchange.kind.into(),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, queue: &QueueDescriptor) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, binding: &Binding) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Closed);
        }

        // Confirms are not enabled, so the returned PublisherConfirm is dropped
        let result = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY_MODE),
            )
            .await;

        match result {
            Ok(_confirm) => Ok(()),
            Err(_) if !self.is_connected() => Err(PublishError::Closed),
            Err(e) => Err(PublishError::Rejected {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.channel.close(200, "OK").await {
            tracing::warn!(error = %e, "Failed to close broker channel");
        }
        if let Err(e) = self.connection.close(200, "OK").await {
            tracing::warn!(error = %e, "Failed to close broker connection");
        }
    }
}

/// Connects to the broker described by `[broker]`.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    config: BrokerConfig,
}

impl AmqpConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    fn uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.config.username.clone(),
                    password: self.config.password.clone(),
                },
                host: self.config.host.clone(),
                port: self.config.port,
            },
            vhost: self.config.vhost.clone(),
            query: Default::default(),
        }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    type Broker = AmqpBroker;

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    async fn connect(&self) -> Result<AmqpBroker, BrokerConnectError> {
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let timeout = self.config.connect_timeout();
        let connection = tokio::time::timeout(timeout, Connection::connect_uri(self.uri(), properties))
            .await
            .map_err(|_| BrokerConnectError::Timeout {
                endpoint: self.endpoint(),
                timeout,
            })?
            .map_err(|source| BrokerConnectError::Connect {
                endpoint: self.endpoint(),
                source,
            })?;

        let channel = connection
            .create_channel()
            .await
            .map_err(BrokerConnectError::Channel)?;

        tracing::info!(endpoint = %self.endpoint(), "Connected to broker");
        Ok(AmqpBroker { connection, channel })
    }
}
