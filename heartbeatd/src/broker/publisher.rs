use tokio::sync::{mpsc, oneshot};
use crate::broker::Broker;
use crate::error::PublishError;

/// Commands sent to the publisher task
pub enum PublisherCommand<B> {
    Publish {
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), PublishError>>,
    },
    Replace(B, oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the task that owns the broker session.
///
/// All publishes go through one task, so the underlying channel is never
/// used concurrently no matter how many callers hold a handle.
pub struct PublisherHandle<B> {
    tx: mpsc::Sender<PublisherCommand<B>>,
}

impl<B> Clone for PublisherHandle<B> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<B: Broker> PublisherHandle<B> {
    /// Spawn the publisher task, taking ownership of `broker`
    pub fn spawn(broker: B) -> Self {
        let (tx, mut rx) = mpsc::channel::<PublisherCommand<B>>(256);

        tokio::spawn(async move {
            let mut broker = broker;
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    PublisherCommand::Publish { exchange, routing_key, payload, reply } => {
                        let result = broker.publish(&exchange, &routing_key, &payload).await;
                        let _ = reply.send(result);
                    }
                    PublisherCommand::Replace(next, reply) => {
                        let previous = std::mem::replace(&mut broker, next);
                        previous.close().await;
                        let _ = reply.send(());
                    }
                    PublisherCommand::Shutdown(reply) => {
                        broker.close().await;
                        tracing::info!("Publisher released broker connection");
                        let _ = reply.send(());
                        return;
                    }
                }
            }
            // Every handle dropped without a shutdown
            broker.close().await;
        });

        Self { tx }
    }

    /// Publish one persistent message. Resolves once the broker has the
    /// message, not when it is routed or consumed.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PublisherCommand::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload,
                reply,
            })
            .await
            .map_err(|_| PublishError::PublisherGone)?;
        rx.await.map_err(|_| PublishError::PublisherGone)?
    }

    /// Swap in a fresh session, closing the old one
    pub async fn replace(&self, broker: B) -> Result<(), PublishError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PublisherCommand::Replace(broker, reply))
            .await
            .map_err(|_| PublishError::PublisherGone)?;
        rx.await.map_err(|_| PublishError::PublisherGone)
    }

    /// Close the session and stop the task. Queued publishes ahead of the
    /// shutdown are still delivered.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(PublisherCommand::Shutdown(reply)).await.is_ok() {
            let _ = rx.await;
        }
    }
}
