/// Default path of the container runtime control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/var/run/docker.sock";

/// Exchange every liveness signal is published to
pub const MONITORING_EXCHANGE: &str = "monitoring";

/// Shared dead-letter exchange for the retry / DLQ companions
pub const DEAD_LETTER_EXCHANGE: &str = "dlx";

/// Routing keys used on the monitoring exchange
pub const HEARTBEAT_ROUTING_KEY: &str = "monitoring.heartbeat";
pub const LOG_ROUTING_KEY: &str = "monitoring.log";

/// AMQP delivery mode marking a message persistent
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Control-socket path for inspecting a single container
pub fn container_inspect_path(name: &str) -> String {
    format!("/containers/{}/json", name)
}

/// Routing-key pattern of a namespace's dead-letter queue, e.g. `dlq.pos.#`
pub fn dlq_pattern(namespace: &str) -> String {
    format!("dlq.{}.#", namespace)
}

/// Routing-key pattern of a namespace's retry queue, e.g. `retry.pos.#`
pub fn retry_pattern(namespace: &str) -> String {
    format!("retry.{}.#", namespace)
}
