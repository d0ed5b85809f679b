use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::{
    DEFAULT_CONTROL_SOCKET, HEARTBEAT_ROUTING_KEY, LOG_ROUTING_KEY, MONITORING_EXCHANGE,
};
use shared::{HeartbeatSchema, ServiceEndpoint};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default = "default_guest")]
    pub username: String,
    #[serde(default = "default_guest")]
    pub password: String,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_delay")]
    pub connect_delay_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Fleet identity; falls back to the system hostname
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub schema: HeartbeatSchema,
    /// Publish DOWN heartbeats with an explicit status instead of staying silent
    #[serde(default)]
    pub report_down: bool,
    #[serde(default = "default_true")]
    pub transition_logs: bool,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_routing_key")]
    pub routing_key: String,
    #[serde(default = "default_log_routing_key")]
    pub log_routing_key: String,
    pub services: Vec<ServiceEndpoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologyConfig {
    /// Topology file; the built-in topology is used when unset
    pub path: Option<PathBuf>,
}

fn default_broker_host() -> String {
    "rabbitmq".to_string()
}

fn default_broker_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_delay() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_interval() -> u64 {
    1000
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONTROL_SOCKET)
}

fn default_read_timeout() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_exchange() -> String {
    MONITORING_EXCHANGE.to_string()
}

fn default_routing_key() -> String {
    HEARTBEAT_ROUTING_KEY.to_string()
}

fn default_log_routing_key() -> String {
    LOG_ROUTING_KEY.to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            vhost: default_vhost(),
            username: default_guest(),
            password: default_guest(),
            connect_attempts: default_connect_attempts(),
            connect_delay_secs: default_connect_delay(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl BrokerConfig {
    /// `host:port/vhost`, safe to log
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.vhost)
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_secs(self.connect_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn resolve_identity(&self) -> Result<String> {
        match &self.identity {
            Some(identity) => Ok(identity.clone()),
            None => Ok(hostname::get()
                .context("Failed to get system hostname")?
                .to_string_lossy()
                .to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.monitor.services.is_empty() {
            bail!("monitor.services must list at least one service");
        }
        if self.monitor.interval_ms == 0 {
            bail!("monitor.interval_ms must be greater than zero");
        }
        if self.monitor.read_timeout_ms == 0 {
            bail!("monitor.read_timeout_ms must be greater than zero");
        }
        if self.broker.connect_timeout_secs == 0 {
            bail!("broker.connect_timeout_secs must be greater than zero");
        }
        if self.broker.connect_attempts == 0 {
            bail!("broker.connect_attempts must be at least 1");
        }

        let mut seen = HashSet::new();
        for service in &self.monitor.services {
            if !is_container_name(&service.name) {
                bail!("invalid service name {:?}", service.name);
            }
            if !seen.insert(service.name.as_str()) {
                bail!("service {:?} is listed twice", service.name);
            }
        }

        Ok(())
    }
}

/// Container names end up in a request path, so keep them to the runtime's alphabet
fn is_container_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
