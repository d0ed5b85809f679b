//! Message bus access: connection, publishing and provisioning.

pub mod amqp;
pub mod connect;
pub mod provision;
pub mod publisher;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use crate::error::{BrokerConnectError, BrokerError, PublishError};
use crate::topology::{Binding, ExchangeDescriptor, QueueDescriptor};

pub use connect::{connect_with_retry, RetryPolicy};
pub use publisher::PublisherHandle;

/// An open, authenticated session with the broker.
///
/// Not safe for concurrent publishing; the publisher actor is its only user
/// once the loop is running.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn declare_exchange(&self, exchange: &ExchangeDescriptor) -> Result<(), BrokerError>;

    async fn declare_queue(&self, queue: &QueueDescriptor) -> Result<(), BrokerError>;

    async fn bind_queue(&self, queue: &str, binding: &Binding) -> Result<(), BrokerError>;

    /// Hand a persistent message to the broker without waiting for an ack
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError>;

    fn is_connected(&self) -> bool;

    async fn close(&self);
}

/// Opens broker sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    type Broker: Broker;

    /// Where this connector points, for logs
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Self::Broker, BrokerConnectError>;
}
