use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use shared::{HeartbeatEncoder, LogEvent, LogLevel, ServiceEndpoint, ServiceStatus, StatusQueryResult};
use crate::broker::{connect_with_retry, Broker, Connector, PublisherHandle, RetryPolicy};
use crate::config::Config;
use crate::docker::StatusProbe;
use crate::error::{BrokerConnectError, PublishError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Connecting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Connecting => "connecting",
            LoopState::Running => "running",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Where and how heartbeats are published.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub identity: String,
    pub interval: Duration,
    pub exchange: String,
    pub routing_key: String,
    pub log_routing_key: String,
    pub report_down: bool,
    pub transition_logs: bool,
}

impl LoopSettings {
    pub fn from_config(config: &Config, identity: String) -> Self {
        Self {
            identity,
            interval: config.monitor.interval(),
            exchange: config.monitor.exchange.clone(),
            routing_key: config.monitor.routing_key.clone(),
            log_routing_key: config.monitor.log_routing_key.clone(),
            report_down: config.monitor.report_down,
            transition_logs: config.monitor.transition_logs,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Heartbeats handed to the broker
    pub published: usize,
    /// Down services that got no heartbeat
    pub skipped: usize,
    /// Heartbeats or transition logs that failed to encode or publish
    pub failed: usize,
    /// Transition logs handed to the broker
    pub logs: usize,
    pub transport_closed: bool,
}

/// Checks every service on a fixed interval and publishes heartbeats.
pub struct HeartbeatLoop<C, P> {
    connector: C,
    probe: P,
    services: Vec<ServiceEndpoint>,
    encoder: HeartbeatEncoder,
    settings: LoopSettings,
    retry: RetryPolicy,
    last_status: HashMap<String, ServiceStatus>,
    state_tx: watch::Sender<LoopState>,
}

impl<C, P> HeartbeatLoop<C, P>
where
    C: Connector,
    P: StatusProbe,
{
    pub fn new(
        connector: C,
        probe: P,
        services: Vec<ServiceEndpoint>,
        encoder: HeartbeatEncoder,
        settings: LoopSettings,
        retry: RetryPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(LoopState::Connecting);
        Self {
            connector,
            probe,
            services,
            encoder,
            settings,
            retry,
            last_status: HashMap::new(),
            state_tx,
        }
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, next: LoopState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "Heartbeat loop state change");
        }
    }

    /// Connect, then tick until `cancel` fires. A tick in progress when
    /// cancellation arrives runs to completion before the connection is
    /// released. Fails only when the broker is unreachable at startup.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BrokerConnectError> {
        self.transition(LoopState::Connecting);

        let broker = tokio::select! {
            result = connect_with_retry(&self.connector, &self.retry) => match result {
                Ok(broker) => broker,
                Err(e) => {
                    self.transition(LoopState::Stopped);
                    return Err(e);
                }
            },
            _ = cancel.cancelled() => {
                self.transition(LoopState::Stopped);
                return Ok(());
            }
        };

        let publisher = PublisherHandle::spawn(broker);
        self.transition(LoopState::Running);
        tracing::info!(
            services = ?self.services.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            exchange = %self.settings.exchange,
            routing_key = %self.settings.routing_key,
            schema = self.encoder.schema().as_str(),
            "Starting heartbeat monitor"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.tick(&publisher).await;
            if report.transport_closed {
                self.reconnect(&publisher).await;
            }
        }

        self.transition(LoopState::Stopping);
        publisher.shutdown().await;
        self.transition(LoopState::Stopped);
        Ok(())
    }

    /// One pass over every service: check all concurrently, then publish in
    /// inventory order. A failure for one service never skips another.
    pub async fn tick<B: Broker>(&mut self, publisher: &PublisherHandle<B>) -> TickReport {
        let probe = &self.probe;
        let results: Vec<StatusQueryResult> =
            join_all(self.services.iter().map(|s| probe.check(&s.name))).await;

        let mut report = TickReport::default();

        for result in &results {
            let status = result.status();
            tracing::info!(service = %result.service_name, %status, "Heartbeat check");

            if self.settings.transition_logs {
                self.log_transition(publisher, result, &mut report).await;
            } else {
                self.last_status.insert(result.service_name.clone(), status);
            }

            if !status.is_up() && !self.settings.report_down {
                report.skipped += 1;
                continue;
            }

            let payload = match self.encoder.encode(&result.service_name, status, || result.queried_at) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(service = %result.service_name, error = %e, "Failed to encode heartbeat");
                    report.failed += 1;
                    continue;
                }
            };

            match publisher
                .publish(&self.settings.exchange, &self.settings.routing_key, payload)
                .await
            {
                Ok(()) => report.published += 1,
                Err(e) => record_publish_failure(&mut report, &result.service_name, "heartbeat", e),
            }
        }

        if report.skipped > 0 {
            tracing::info!(down = report.skipped, "Skipping heartbeat send for DOWN services");
        }

        report
    }

    async fn log_transition<B: Broker>(
        &mut self,
        publisher: &PublisherHandle<B>,
        result: &StatusQueryResult,
        report: &mut TickReport,
    ) {
        let status = result.status();
        let previous = self.last_status.insert(result.service_name.clone(), status);

        let (level, message) = match (previous, status) {
            (None, ServiceStatus::Down) => {
                (LogLevel::Warning, format!("{} is DOWN", result.service_name))
            }
            (Some(ServiceStatus::Up), ServiceStatus::Down) => {
                (LogLevel::Warning, format!("{} went DOWN", result.service_name))
            }
            (Some(ServiceStatus::Down), ServiceStatus::Up) => {
                (LogLevel::Info, format!("{} is UP again", result.service_name))
            }
            _ => return,
        };

        let event = LogEvent::new(&self.settings.identity, level, message, result.queried_at);
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(service = %result.service_name, error = %e, "Failed to encode transition log");
                report.failed += 1;
                return;
            }
        };

        match publisher
            .publish(&self.settings.exchange, &self.settings.log_routing_key, payload)
            .await
        {
            Ok(()) => report.logs += 1,
            Err(e) => record_publish_failure(report, &result.service_name, "transition log", e),
        }
    }

    /// Single reconnect attempt after the transport was found closed
    async fn reconnect(&self, publisher: &PublisherHandle<C::Broker>) {
        tracing::warn!(endpoint = %self.connector.endpoint(), "Broker connection lost, reconnecting");
        match self.connector.connect().await {
            Ok(broker) => {
                if let Err(e) = publisher.replace(broker).await {
                    tracing::error!(error = %e, "Failed to install new broker connection");
                } else {
                    tracing::info!("Broker connection restored");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Reconnect failed, retrying after next tick");
            }
        }
    }
}

fn record_publish_failure(report: &mut TickReport, service: &str, what: &str, error: PublishError) {
    if matches!(error, PublishError::Closed) {
        report.transport_closed = true;
    }
    report.failed += 1;
    tracing::error!(service, error = %error, "Failed to publish {}", what);
}
