//! Prometheus metrics for the audit core.

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::{Arc, Mutex};

/// Label distinguishing per-node audit outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Outcome {
    pub outcome: String,
}

impl Outcome {
    fn new(outcome: &str) -> Self {
        Self {
            outcome: outcome.into(),
        }
    }
}

/// Counters the verifier and reverifier maintain.
#[derive(Clone)]
pub struct Metrics {
    /// Shares that downloaded successfully per verify.
    pub shares_downloaded: Counter,
    /// Audits aborted because fewer than `required` shares arrived.
    pub not_enough_shares: Counter,
    /// Per-outcome node verdicts from verify.
    pub verify_nodes: Family<Outcome, Counter>,
    /// Per-outcome node verdicts from reverify.
    pub reverify_nodes: Family<Outcome, Counter>,
    /// Contained nodes encountered per reverified segment.
    pub reverify_contained: Counter,
}

impl Metrics {
    /// Creates the metric set and registers it.
    pub fn new(registry: &Arc<Mutex<Registry>>) -> Self {
        let metrics = Self {
            shares_downloaded: Counter::default(),
            not_enough_shares: Counter::default(),
            verify_nodes: Family::default(),
            reverify_nodes: Family::default(),
            reverify_contained: Counter::default(),
        };
        let mut registry = registry.lock().unwrap();
        registry.register(
            "audit_shares_downloaded",
            "number of shares downloaded successfully during verification",
            metrics.shares_downloaded.clone(),
        );
        registry.register(
            "audit_not_enough_shares",
            "number of audits aborted for lack of shares",
            metrics.not_enough_shares.clone(),
        );
        registry.register(
            "audit_verify_nodes",
            "number of node verdicts per verification outcome",
            metrics.verify_nodes.clone(),
        );
        registry.register(
            "audit_reverify_nodes",
            "number of node verdicts per reverification outcome",
            metrics.reverify_nodes.clone(),
        );
        registry.register(
            "audit_reverify_contained",
            "number of contained nodes encountered during reverification",
            metrics.reverify_contained.clone(),
        );
        metrics
    }

    /// Bumps a verify outcome counter by `count`.
    pub(crate) fn observe_verify(&self, outcome: &str, count: usize) {
        self.verify_nodes
            .get_or_create(&Outcome::new(outcome))
            .inc_by(count as u64);
    }

    /// Bumps a reverify outcome counter by `count`.
    pub(crate) fn observe_reverify(&self, outcome: &str, count: usize) {
        self.reverify_nodes
            .get_or_create(&Outcome::new(outcome))
            .inc_by(count as u64);
    }
}
