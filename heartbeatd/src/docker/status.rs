use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use shared::protocol::container_inspect_path;
use shared::StatusQueryResult;
use crate::docker::client::ControlSocketClient;
use crate::error::MalformedStatusError;

/// Answers "is this service running?". Implementations never fail: any
/// uncertainty is reported as not running.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn is_running(&self, service: &str) -> bool;

    async fn check(&self, service: &str) -> StatusQueryResult {
        let is_running = self.is_running(service).await;
        StatusQueryResult {
            service_name: service.to_string(),
            is_running,
            queried_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "State")]
    state: Option<ContainerState>,
}

#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Status")]
    status: Option<String>,
}

/// Status checks against the Docker engine API.
#[derive(Debug, Clone)]
pub struct DockerStatusChecker {
    client: ControlSocketClient,
}

impl DockerStatusChecker {
    pub fn new(client: ControlSocketClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusProbe for DockerStatusChecker {
    async fn is_running(&self, service: &str) -> bool {
        let response = match self.client.query_text(&container_inspect_path(service)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(service, error = %e, "Error checking service status");
                return false;
            }
        };

        match parse_running(&response) {
            Ok(running) => running,
            Err(e) => {
                tracing::error!(service, error = %e, "Invalid status response from container runtime");
                false
            }
        }
    }
}

/// Parse a raw inspect response. `Ok(true)` only for `State.Status == "running"`.
pub fn parse_running(response: &str) -> Result<bool, MalformedStatusError> {
    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or(MalformedStatusError::MissingSeparator)?;

    if let Some(code) = status_code(head) {
        if !(200..300).contains(&code) {
            return Err(MalformedStatusError::HttpStatus(code));
        }
    }

    let document = extract_document(body).ok_or(MalformedStatusError::MissingDocument)?;
    let inspect: ContainerInspect = serde_json::from_str(document)?;

    Ok(inspect
        .state
        .and_then(|state| state.status)
        .is_some_and(|status| status == "running"))
}

/// Best-effort extraction: the slice from the first `{` to the last `}`.
/// Tolerates chunked framing and trailing noise around a single object.
// TODO: a response carrying several top-level objects is mis-extracted; scan
// with serde_json::Deserializer::into_iter if the runtime ever streams them.
fn extract_document(body: &str) -> Option<&str> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

fn status_code(head: &str) -> Option<u16> {
    let status_line = head.lines().next()?;
    let mut parts = status_line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
