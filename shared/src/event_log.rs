//! `<log>` documents carried on the `monitoring.log` routing key.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use crate::heartbeat::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// A human-readable monitoring log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "log")]
pub struct LogEvent {
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename = "log")]
struct LogDoc<'a> {
    sender: &'a str,
    timestamp: String,
    level: LogLevel,
    message: &'a str,
}

impl LogEvent {
    pub fn new(
        sender: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender: sender.into(),
            timestamp,
            level,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let doc = LogDoc {
            sender: &self.sender,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            level: self.level,
            message: &self.message,
        };
        quick_xml::se::to_string(&doc)
            .map(String::into_bytes)
            .map_err(|e| CodecError::Encode("log", e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| CodecError::Decode("log", e.to_string()))?;
        quick_xml::de::from_str(text).map_err(|e| CodecError::Decode("log", e.to_string()))
    }
}
