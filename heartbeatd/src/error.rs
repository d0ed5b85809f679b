//! Error types for the heartbeat daemon.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Transport failure talking to the container runtime daemon.
#[derive(Debug, Error)]
pub enum ControlChannelError {
    #[error("failed to connect to control socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to control socket {path} after {timeout:?}")]
    ConnectTimeout { path: PathBuf, timeout: Duration },

    #[error("failed to write request: {0}")]
    Write(#[source] std::io::Error),

    #[error("timed out writing request after {0:?}")]
    WriteTimeout(Duration),

    #[error("failed to read response: {0}")]
    Read(#[source] std::io::Error),

    #[error("response is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
}

/// A response from the runtime that does not contain a usable status document.
#[derive(Debug, Error)]
pub enum MalformedStatusError {
    #[error("no header/body separator in response")]
    MissingSeparator,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("no JSON object in response body")]
    MissingDocument,

    #[error("invalid status document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Startup-time failure to reach the broker.
#[derive(Debug, Error)]
pub enum BrokerConnectError {
    #[error("failed to connect to broker at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: lapin::Error,
    },

    #[error("timed out connecting to broker at {endpoint} after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("broker unreachable after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<BrokerConnectError>,
    },
}

/// Failure to hand one message to the broker.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker rejected publish to {exchange}/{routing_key}: {reason}")]
    Rejected {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    #[error("broker connection is closed")]
    Closed,

    #[error("publisher is not running")]
    PublisherGone,
}

/// Failure of a single declare/bind operation.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("{0}")]
    Amqp(#[from] lapin::Error),

    #[cfg(test)]
    #[error("precondition failed: {0}")]
    Precondition(String),
}

/// Provisioning or validation failure of the bus topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to parse topology: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid topology: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("failed to declare exchange {name}: {source}")]
    DeclareExchange {
        name: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to declare queue {name}: {source}")]
    DeclareQueue {
        name: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to bind queue {queue} to {exchange} with {routing_key}: {source}")]
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: BrokerError,
    },
}
