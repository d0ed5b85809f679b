use serde::Serialize;
use sha2::{Digest, Sha256};
use crate::topology::{ExchangeKind, Topology};

#[derive(Serialize)]
struct ExchangeView<'a> {
    name: &'a str,
    kind: ExchangeKind,
    durable: bool,
}

#[derive(Serialize)]
struct QueueView<'a> {
    name: &'a str,
    durable: bool,
    bindings: Vec<(&'a str, &'a str)>,
}

#[derive(Serialize)]
struct TopologyView<'a> {
    exchanges: Vec<ExchangeView<'a>>,
    queues: Vec<QueueView<'a>>,
}

/// SHA-256 of the observable topology: exchanges, queues, durability and
/// bindings. Declaration order does not affect the result, so two files that
/// provision the same broker state hash identically.
pub fn fingerprint(topology: &Topology) -> String {
    let mut exchanges: Vec<ExchangeView<'_>> = topology
        .exchanges
        .iter()
        .map(|e| ExchangeView { name: &e.name, kind: e.kind, durable: e.durable })
        .collect();
    exchanges.sort_by(|a, b| a.name.cmp(b.name));

    let mut queues: Vec<QueueView<'_>> = topology
        .queues
        .iter()
        .map(|q| {
            let mut bindings: Vec<(&str, &str)> = q
                .bindings
                .iter()
                .map(|b| (b.exchange.as_str(), b.routing_key.as_str()))
                .collect();
            bindings.sort_unstable();
            bindings.dedup();
            QueueView { name: &q.name, durable: q.durable, bindings }
        })
        .collect();
    queues.sort_by(|a, b| a.name.cmp(b.name));

    let view = TopologyView { exchanges, queues };

    let json = serde_json::to_string(&view)
        .expect("Failed to serialize topology for fingerprinting");

    hex::encode(Sha256::digest(json.as_bytes()))
}
