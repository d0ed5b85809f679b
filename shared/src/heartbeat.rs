//! Heartbeat wire schema.
//!
//! Two XML layouts are in circulation on the `monitoring` exchange. A
//! publisher emits exactly one of them for its whole run.
//!
//! Variant A (`attendify`), timestamp in UTC with microseconds and a `Z` suffix:
//!
//! ```text
//! <attendify><info><sender>Frontend</sender><container_name>web-1</container_name>
//! <timestamp>2025-05-01T12:00:00.123456Z</timestamp></info></attendify>
//! ```
//!
//! Variant B (`heartbeat`), timestamp in milliseconds since the Unix epoch:
//!
//! ```text
//! <heartbeat><sender>web-1</sender><timestamp>1746100800123</timestamp></heartbeat>
//! ```
//!
//! Variant B has no separate identity field: the monitored service is the
//! sender. Publishers that report down services add a `<status>UP|DOWN</status>`
//! element (inside `info` for A, under the root for B). Consumers must accept
//! its absence, which means the service was up.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::types::ServiceStatus;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode {0}: {1}")]
    Encode(&'static str, String),

    #[error("failed to decode {0}: {1}")]
    Decode(&'static str, String),

    #[error("invalid timestamp {0:?}")]
    Timestamp(String),

    #[error("unrecognised document root")]
    UnknownRoot,
}

/// Which XML layout a heartbeat uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatSchema {
    /// Variant A: `<attendify><info>...</info></attendify>`
    Attendify,
    /// Variant B: `<heartbeat>...</heartbeat>`
    #[default]
    Heartbeat,
}

/// A single liveness signal, independent of its wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatEvent {
    /// Identity of the publisher (fleet identity in variant A)
    pub sender: String,
    /// The monitored service the heartbeat is about
    pub service: String,
    pub timestamp: DateTime<Utc>,
    /// Present only when the publisher reports down services too
    pub status: Option<ServiceStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "attendify")]
struct AttendifyDoc {
    info: AttendifyInfo,
}

#[derive(Debug, Serialize, Deserialize)]
struct AttendifyInfo {
    sender: String,
    container_name: String,
    timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "heartbeat")]
struct HeartbeatDoc {
    sender: String,
    timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

impl HeartbeatSchema {
    pub fn as_str(self) -> &'static str {
        match self {
            HeartbeatSchema::Attendify => "attendify",
            HeartbeatSchema::Heartbeat => "heartbeat",
        }
    }

    pub fn encode(self, event: &HeartbeatEvent) -> Result<Vec<u8>, CodecError> {
        let status = event.status.map(|s| s.as_str().to_string());
        let xml = match self {
            HeartbeatSchema::Attendify => quick_xml::se::to_string(&AttendifyDoc {
                info: AttendifyInfo {
                    sender: event.sender.clone(),
                    container_name: event.service.clone(),
                    timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                    status,
                },
            }),
            HeartbeatSchema::Heartbeat => quick_xml::se::to_string(&HeartbeatDoc {
                sender: event.service.clone(),
                timestamp: event.timestamp.timestamp_millis(),
                status,
            }),
        }
        .map_err(|e| CodecError::Encode(self.as_str(), e.to_string()))?;

        Ok(xml.into_bytes())
    }

    pub fn decode(self, bytes: &[u8]) -> Result<HeartbeatEvent, CodecError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| CodecError::Decode(self.as_str(), e.to_string()))?;

        match self {
            HeartbeatSchema::Attendify => {
                let doc: AttendifyDoc = quick_xml::de::from_str(text)
                    .map_err(|e| CodecError::Decode(self.as_str(), e.to_string()))?;
                let timestamp = DateTime::parse_from_rfc3339(doc.info.timestamp.trim())
                    .map_err(|_| CodecError::Timestamp(doc.info.timestamp.clone()))?
                    .with_timezone(&Utc);
                Ok(HeartbeatEvent {
                    sender: doc.info.sender,
                    service: doc.info.container_name,
                    timestamp,
                    status: parse_status(self, doc.info.status)?,
                })
            }
            HeartbeatSchema::Heartbeat => {
                let doc: HeartbeatDoc = quick_xml::de::from_str(text)
                    .map_err(|e| CodecError::Decode(self.as_str(), e.to_string()))?;
                let timestamp = Utc
                    .timestamp_millis_opt(doc.timestamp)
                    .single()
                    .ok_or_else(|| CodecError::Timestamp(doc.timestamp.to_string()))?;
                Ok(HeartbeatEvent {
                    sender: doc.sender.clone(),
                    service: doc.sender,
                    timestamp,
                    status: parse_status(self, doc.status)?,
                })
            }
        }
    }

    /// Guess the layout from the document's root element
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?.trim_start();
        let text = match text.strip_prefix("<?xml") {
            Some(rest) => rest.split_once("?>")?.1.trim_start(),
            None => text,
        };
        if root_is(text, "attendify") {
            Some(HeartbeatSchema::Attendify)
        } else if root_is(text, "heartbeat") {
            Some(HeartbeatSchema::Heartbeat)
        } else {
            None
        }
    }
}

fn root_is(text: &str, name: &str) -> bool {
    text.strip_prefix('<')
        .and_then(|rest| rest.strip_prefix(name))
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace())
}

fn parse_status(
    schema: HeartbeatSchema,
    status: Option<String>,
) -> Result<Option<ServiceStatus>, CodecError> {
    status
        .map(|s| s.parse().map_err(|e| CodecError::Decode(schema.as_str(), e)))
        .transpose()
}

/// Decode a heartbeat of either layout
pub fn decode_any(bytes: &[u8]) -> Result<HeartbeatEvent, CodecError> {
    HeartbeatSchema::detect(bytes)
        .ok_or(CodecError::UnknownRoot)?
        .decode(bytes)
}

/// Builds heartbeats for one publisher run.
#[derive(Debug, Clone)]
pub struct HeartbeatEncoder {
    schema: HeartbeatSchema,
    identity: String,
    with_status: bool,
}

impl HeartbeatEncoder {
    pub fn new(schema: HeartbeatSchema, identity: impl Into<String>, with_status: bool) -> Self {
        Self {
            schema,
            identity: identity.into(),
            with_status,
        }
    }

    pub fn schema(&self) -> HeartbeatSchema {
        self.schema
    }

    pub fn event(
        &self,
        service: &str,
        status: ServiceStatus,
        now: impl FnOnce() -> DateTime<Utc>,
    ) -> HeartbeatEvent {
        HeartbeatEvent {
            sender: self.identity.clone(),
            service: service.to_string(),
            timestamp: now(),
            status: self.with_status.then_some(status),
        }
    }

    pub fn encode(
        &self,
        service: &str,
        status: ServiceStatus,
        now: impl FnOnce() -> DateTime<Utc>,
    ) -> Result<Vec<u8>, CodecError> {
        self.schema.encode(&self.event(service, status, now))
    }
}
