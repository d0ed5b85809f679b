//! In-memory broker and connector for tests.
//!
//! Mirrors the broker behaviour the daemon relies on: re-declaring an object
//! with the same attributes is a no-op, with different attributes it fails,
//! and binding requires both ends to exist.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use crate::broker::{Broker, Connector};
use crate::error::{BrokerConnectError, BrokerError, PublishError};
use crate::topology::{Binding, ExchangeDescriptor, ExchangeKind, QueueDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub persistent: bool,
}

#[derive(Default)]
struct MemoryState {
    connected: bool,
    exchanges: BTreeMap<String, (ExchangeKind, bool)>,
    queues: BTreeMap<String, bool>,
    bindings: BTreeSet<(String, String, String)>,
    published: Vec<Published>,
    declare_calls: usize,
    close_count: usize,
    in_flight: usize,
    max_in_flight: usize,
    fail_object: Option<String>,
    fail_payload: Option<String>,
}

/// Cloneable view of one shared broker state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBroker {
    pub fn connected() -> Self {
        let broker = Self::default();
        broker.state.lock().unwrap().connected = true;
        broker
    }

    pub fn drop_connection(&self) {
        self.state.lock().unwrap().connected = false;
    }

    /// Make any declare or bind that names `object` fail
    pub fn fail_on(&self, object: &str) {
        self.state.lock().unwrap().fail_object = Some(object.to_string());
    }

    /// Make publishes whose payload contains `needle` fail
    pub fn fail_payloads_containing(&self, needle: &str) {
        self.state.lock().unwrap().fail_payload = Some(needle.to_string());
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_on(&self, routing_key: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.routing_key == routing_key)
            .collect()
    }

    pub fn clear_published(&self) {
        self.state.lock().unwrap().published.clear();
    }

    pub fn exchanges(&self) -> BTreeMap<String, (ExchangeKind, bool)> {
        self.state.lock().unwrap().exchanges.clone()
    }

    pub fn queues(&self) -> BTreeMap<String, bool> {
        self.state.lock().unwrap().queues.clone()
    }

    pub fn bindings(&self) -> BTreeSet<(String, String, String)> {
        self.state.lock().unwrap().bindings.clone()
    }

    pub fn declare_calls(&self) -> usize {
        self.state.lock().unwrap().declare_calls
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn check_injected(state: &MemoryState, names: &[&str]) -> Result<(), BrokerError> {
        match &state.fail_object {
            Some(object) if names.contains(&object.as_str()) => {
                Err(BrokerError::Precondition(format!("injected failure on {}", object)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(&self, exchange: &ExchangeDescriptor) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.declare_calls += 1;
        Self::check_injected(&state, &[exchange.name.as_str()])?;

        let wanted = (exchange.kind, exchange.durable);
        match state.exchanges.get(&exchange.name) {
            Some(existing) if *existing != wanted => Err(BrokerError::Precondition(format!(
                "exchange {} exists with different attributes",
                exchange.name
            ))),
            _ => {
                state.exchanges.insert(exchange.name.clone(), wanted);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, queue: &QueueDescriptor) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.declare_calls += 1;
        Self::check_injected(&state, &[queue.name.as_str()])?;

        match state.queues.get(&queue.name) {
            Some(durable) if *durable != queue.durable => Err(BrokerError::Precondition(format!(
                "queue {} exists with different durability",
                queue.name
            ))),
            _ => {
                state.queues.insert(queue.name.clone(), queue.durable);
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, queue: &str, binding: &Binding) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        Self::check_injected(&state, &[queue, binding.exchange.as_str()])?;

        if !state.queues.contains_key(queue) {
            return Err(BrokerError::Precondition(format!("no queue {}", queue)));
        }
        if !state.exchanges.contains_key(&binding.exchange) {
            return Err(BrokerError::Precondition(format!("no exchange {}", binding.exchange)));
        }
        state.bindings.insert((
            queue.to_string(),
            binding.exchange.clone(),
            binding.routing_key.clone(),
        ));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return Err(PublishError::Closed);
            }
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }

        tokio::task::yield_now().await;

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;

        let text = String::from_utf8_lossy(payload);
        if let Some(needle) = &state.fail_payload {
            if text.contains(needle.as_str()) {
                return Err(PublishError::Rejected {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    reason: "injected".to_string(),
                });
            }
        }

        state.published.push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
            persistent: true,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn close(&self) {
        self.state.lock().unwrap().close_count += 1;
    }
}

/// Connector that fails a set number of times before handing out `broker`.
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
    failures_left: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
}

impl MemoryConnector {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            failures_left: Arc::new(AtomicU32::new(0)),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn failing(failures: u32) -> Self {
        let connector = Self::new(MemoryBroker::default());
        connector.fail_next(failures);
        connector
    }

    pub fn fail_next(&self, failures: u32) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Broker = MemoryBroker;

    fn endpoint(&self) -> String {
        "memory".to_string()
    }

    async fn connect(&self) -> Result<MemoryBroker, BrokerConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerConnectError::Timeout {
                endpoint: self.endpoint(),
                timeout: Duration::from_secs(1),
            });
        }

        self.broker.state.lock().unwrap().connected = true;
        Ok(self.broker.clone())
    }
}
