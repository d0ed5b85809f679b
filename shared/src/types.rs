use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// A monitored service.
/// `name` must match the container name known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Container name, e.g. "attendify-frontend-wordpress-1"
    pub name: String,

    /// Auxiliary port, informational only
    #[serde(default)]
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self { name: name.into(), port }
    }
}

/// Liveness of a service as seen by one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl ServiceStatus {
    pub fn from_running(running: bool) -> Self {
        if running { ServiceStatus::Up } else { ServiceStatus::Down }
    }

    pub fn is_up(self) -> bool {
        self == ServiceStatus::Up
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Up => "UP",
            ServiceStatus::Down => "DOWN",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "UP" => Ok(ServiceStatus::Up),
            "DOWN" => Ok(ServiceStatus::Down),
            other => Err(format!("unknown service status: {:?}", other)),
        }
    }
}

/// Outcome of a single status check. Lives for one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusQueryResult {
    pub service_name: String,
    pub is_running: bool,
    pub queried_at: DateTime<Utc>,
}

impl StatusQueryResult {
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::from_running(self.is_running)
    }
}
