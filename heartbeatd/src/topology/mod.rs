//! Declarative description of the exchanges, queues and bindings that every
//! service on the bus relies on.
//!
//! The topology is data: it is read from TOML (the built-in copy is embedded
//! from `topology.toml`), expanded with the dead-letter companions of each
//! consuming namespace, and validated before anything touches the broker.

pub mod fingerprint;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use shared::protocol::{dlq_pattern, retry_pattern};
use crate::error::TopologyError;

const BUILTIN_TOPOLOGY: &str = include_str!("../../topology.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Topic,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Direct => f.write_str("direct"),
            ExchangeKind::Topic => f.write_str("topic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDescriptor {
    pub name: String,
    pub kind: ExchangeKind,
    #[serde(default = "default_durable")]
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub name: String,
    #[serde(default = "default_durable")]
    pub durable: bool,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeadLetterConfig {
    pub exchange: String,
    pub namespaces: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TopologyFile {
    #[serde(default, rename = "exchange")]
    exchanges: Vec<ExchangeDescriptor>,
    #[serde(default, rename = "queue")]
    queues: Vec<QueueDescriptor>,
    dead_letter: Option<DeadLetterConfig>,
}

fn default_durable() -> bool {
    true
}

/// The full set of exchanges and queues, companions already expanded.
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchanges: Vec<ExchangeDescriptor>,
    pub queues: Vec<QueueDescriptor>,
    pub dead_letter: Option<DeadLetterConfig>,
}

#[cfg(test)]
impl ExchangeDescriptor {
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self { name: name.into(), kind, durable: true }
    }
}

impl Binding {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self { exchange: exchange.into(), routing_key: routing_key.into() }
    }

    pub fn is_wildcard(&self) -> bool {
        self.routing_key.split('.').any(|word| word == "#" || word == "*")
    }
}

impl QueueDescriptor {
    pub fn new(name: impl Into<String>, bindings: Vec<Binding>) -> Self {
        Self { name: name.into(), durable: true, bindings }
    }
}

impl Topology {
    /// The topology shipped with the daemon
    pub fn builtin() -> Result<Self, TopologyError> {
        Self::from_toml(BUILTIN_TOPOLOGY)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read topology file: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse topology file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self, TopologyError> {
        let file: TopologyFile = toml::from_str(contents)?;
        let mut queues = file.queues;

        if let Some(dead_letter) = &file.dead_letter {
            for namespace in &dead_letter.namespaces {
                queues.push(QueueDescriptor::new(
                    format!("{}.dlq", namespace),
                    vec![Binding::new(&dead_letter.exchange, dlq_pattern(namespace))],
                ));
                queues.push(QueueDescriptor::new(
                    format!("{}.retry", namespace),
                    vec![Binding::new(&dead_letter.exchange, retry_pattern(namespace))],
                ));
            }
        }

        Ok(Self {
            exchanges: file.exchanges,
            queues,
            dead_letter: file.dead_letter,
        })
    }

    pub fn exchange(&self, name: &str) -> Option<&ExchangeDescriptor> {
        self.exchanges.iter().find(|e| e.name == name)
    }

    pub fn queue(&self, name: &str) -> Option<&QueueDescriptor> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Every `(queue, exchange, routing_key)` triple, ordered
    pub fn binding_set(&self) -> BTreeSet<(String, String, String)> {
        self.queues
            .iter()
            .flat_map(|q| {
                q.bindings
                    .iter()
                    .map(move |b| (q.name.clone(), b.exchange.clone(), b.routing_key.clone()))
            })
            .collect()
    }

    /// Structural problems that make the topology unsafe to provision
    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut problems = Vec::new();

        let mut kinds = HashMap::new();
        for exchange in &self.exchanges {
            if kinds.insert(exchange.name.as_str(), exchange.kind).is_some() {
                problems.push(format!("exchange {} is declared twice", exchange.name));
            }
        }

        let mut queue_names = HashSet::new();
        for queue in &self.queues {
            if !queue_names.insert(queue.name.as_str()) {
                problems.push(format!("queue {} is declared twice", queue.name));
            }
            let mut seen = HashSet::new();
            for binding in &queue.bindings {
                if !kinds.contains_key(binding.exchange.as_str()) {
                    problems.push(format!(
                        "queue {} binds to undeclared exchange {}",
                        queue.name, binding.exchange
                    ));
                }
                if !seen.insert(binding) {
                    problems.push(format!(
                        "queue {} binds {}/{} twice",
                        queue.name, binding.exchange, binding.routing_key
                    ));
                }
            }
        }

        if let Some(dead_letter) = &self.dead_letter {
            match kinds.get(dead_letter.exchange.as_str()) {
                None => problems.push(format!(
                    "dead-letter exchange {} is not declared",
                    dead_letter.exchange
                )),
                Some(ExchangeKind::Topic) => {}
                Some(kind) => problems.push(format!(
                    "dead-letter exchange {} must be topic, not {}",
                    dead_letter.exchange, kind
                )),
            }

            for namespace in &dead_letter.namespaces {
                let companions = [
                    (format!("{}.dlq", namespace), dlq_pattern(namespace)),
                    (format!("{}.retry", namespace), retry_pattern(namespace)),
                ];
                for (queue, pattern) in companions {
                    let bound = self.queue(&queue).is_some_and(|q| {
                        q.bindings
                            .iter()
                            .any(|b| b.exchange == dead_letter.exchange && b.routing_key == pattern)
                    });
                    if !bound {
                        problems.push(format!(
                            "namespace {} lacks {} bound on {}",
                            namespace, queue, pattern
                        ));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(TopologyError::Invalid(problems))
        }
    }

    /// Suspicious but provisionable bindings: wildcard keys on direct exchanges
    /// match only the literal key.
    pub fn lint(&self) -> Vec<String> {
        self.queues
            .iter()
            .flat_map(|q| q.bindings.iter().map(move |b| (q, b)))
            .filter(|(_, b)| b.is_wildcard())
            .filter(|(_, b)| {
                self.exchange(&b.exchange)
                    .is_some_and(|e| e.kind == ExchangeKind::Direct)
            })
            .map(|(q, b)| {
                format!(
                    "queue {} binds wildcard {:?} on direct exchange {}",
                    q.name, b.routing_key, b.exchange
                )
            })
            .collect()
    }
}
