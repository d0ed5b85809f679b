use crate::broker::Broker;
use crate::error::TopologyError;
use crate::topology::Topology;

/// Counts of objects declared by one provisioning run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub exchanges: usize,
    pub queues: usize,
    pub bindings: usize,
}

/// Declare every exchange, then every queue followed by its bindings.
///
/// Safe to re-run: declarations with unchanged attributes are no-ops on the
/// broker. The first failure aborts the run, leaving later objects undeclared.
pub async fn provision<B: Broker + ?Sized>(
    broker: &B,
    topology: &Topology,
) -> Result<ProvisionReport, TopologyError> {
    topology.validate()?;
    for warning in topology.lint() {
        tracing::warn!("{}", warning);
    }

    let mut report = ProvisionReport::default();

    for exchange in &topology.exchanges {
        broker
            .declare_exchange(exchange)
            .await
            .map_err(|source| TopologyError::DeclareExchange {
                name: exchange.name.clone(),
                source,
            })?;
        tracing::debug!(exchange = %exchange.name, kind = %exchange.kind, "Declared exchange");
        report.exchanges += 1;
    }

    for queue in &topology.queues {
        broker
            .declare_queue(queue)
            .await
            .map_err(|source| TopologyError::DeclareQueue {
                name: queue.name.clone(),
                source,
            })?;
        report.queues += 1;

        for binding in &queue.bindings {
            broker
                .bind_queue(&queue.name, binding)
                .await
                .map_err(|source| TopologyError::Bind {
                    queue: queue.name.clone(),
                    exchange: binding.exchange.clone(),
                    routing_key: binding.routing_key.clone(),
                    source,
                })?;
            report.bindings += 1;
        }
        tracing::debug!(queue = %queue.name, bindings = queue.bindings.len(), "Declared queue");
    }

    tracing::info!(
        exchanges = report.exchanges,
        queues = report.queues,
        bindings = report.bindings,
        "Topology provisioned"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::topology::{ExchangeDescriptor, ExchangeKind};

    #[tokio::test]
    async fn test_provision_builtin() {
        let broker = MemoryBroker::connected();
        let topology = Topology::builtin().unwrap();

        let report = provision(&broker, &topology).await.unwrap();

        assert_eq!(report.exchanges, 7);
        assert_eq!(report.queues, topology.queues.len());
        assert_eq!(broker.exchanges().len(), 7);
        assert_eq!(broker.exchanges()["dlx"], (ExchangeKind::Topic, true));
        assert_eq!(broker.queues().len(), topology.queues.len());
        assert_eq!(broker.bindings(), topology.binding_set());
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let broker = MemoryBroker::connected();
        let topology = Topology::builtin().unwrap();

        let first = provision(&broker, &topology).await.unwrap();
        let bindings = broker.bindings();
        let second = provision(&broker, &topology).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(broker.bindings(), bindings);
        assert_eq!(broker.queues().len(), topology.queues.len());
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_declarations() {
        let broker = MemoryBroker::connected();
        broker.fail_on("crm.event");
        let topology = Topology::builtin().unwrap();

        let err = provision(&broker, &topology).await.unwrap_err();

        assert!(matches!(err, TopologyError::DeclareQueue { ref name, .. } if name == "crm.event"));
        let queues = broker.queues();
        assert!(queues.contains_key("crm.user"));
        assert!(!queues.contains_key("crm.event"));
        assert!(!queues.contains_key("crm.session"));
        assert!(!queues.contains_key("pos.dlq"));
    }

    #[tokio::test]
    async fn test_exchange_failure_declares_no_queues() {
        let broker = MemoryBroker::connected();
        broker.fail_on("monitoring");

        let err = provision(&broker, &Topology::builtin().unwrap()).await.unwrap_err();

        assert!(matches!(err, TopologyError::DeclareExchange { .. }));
        assert!(broker.queues().is_empty());
        assert!(!broker.exchanges().contains_key("dlx"));
    }

    #[tokio::test]
    async fn test_conflicting_existing_exchange_is_fatal() {
        let broker = MemoryBroker::connected();
        broker
            .declare_exchange(&ExchangeDescriptor::new("monitoring", ExchangeKind::Direct))
            .await
            .unwrap();

        let err = provision(&broker, &Topology::builtin().unwrap()).await.unwrap_err();
        assert!(matches!(err, TopologyError::DeclareExchange { ref name, .. } if name == "monitoring"));
    }

    #[tokio::test]
    async fn test_invalid_topology_touches_nothing() {
        let broker = MemoryBroker::connected();
        let topology = Topology::from_toml(r#"
            [[queue]]
            name = "orphan"
            bindings = [{ exchange = "nowhere", routing_key = "x" }]
        "#).unwrap();

        let err = provision(&broker, &topology).await.unwrap_err();
        assert!(matches!(err, TopologyError::Invalid(_)));
        assert_eq!(broker.declare_calls(), 0);
    }
}
