//! Prometheus metrics for the governance engine.
//!
//! [`GovernanceMetrics`] owns a dedicated [`Registry`]; `GET /metrics`
//! encodes it in the Prometheus text exposition format.

use agora_governance::TallyResult;
use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

pub struct GovernanceMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    pub proposals_submitted: IntCounter,
    pub compliance_passed: IntCounter,
    pub compliance_rejected: IntCounter,
    /// Accepted votes, re-votes included.
    pub votes_cast: IntCounter,
    pub tallies_approved: IntCounter,
    pub tallies_rejected: IntCounter,
    pub executions_succeeded: IntCounter,
    pub executions_failed: IntCounter,
    pub reverts: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Proposals currently accepting votes. Refreshed on every scrape.
    pub open_proposals: IntGauge,
    /// Approved proposals not yet executed. Refreshed on every scrape.
    pub awaiting_execution: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Wall time of `execute` calls, in milliseconds.
    pub execution_time_ms: Histogram,
}

macro_rules! counter {
    ($registry:expr, $name:expr, $help:expr) => {
        register_int_counter_with_registry!(Opts::new($name, $help), $registry)
            .expect(concat!("failed to register ", $name))
    };
}

macro_rules! gauge {
    ($registry:expr, $name:expr, $help:expr) => {
        register_int_gauge_with_registry!(Opts::new($name, $help), $registry)
            .expect(concat!("failed to register ", $name))
    };
}

impl GovernanceMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let proposals_submitted = counter!(
            registry,
            "agora_proposals_submitted_total",
            "Proposals accepted for compliance review"
        );
        let compliance_passed = counter!(
            registry,
            "agora_compliance_passed_total",
            "Proposals opened for voting by the compliance gate"
        );
        let compliance_rejected = counter!(
            registry,
            "agora_compliance_rejected_total",
            "Proposals rejected by the compliance gate"
        );
        let votes_cast = counter!(registry, "agora_votes_cast_total", "Votes recorded");
        let tallies_approved = counter!(
            registry,
            "agora_tallies_approved_total",
            "Tallies that approved a proposal"
        );
        let tallies_rejected = counter!(
            registry,
            "agora_tallies_rejected_total",
            "Tallies that rejected a proposal"
        );
        let executions_succeeded = counter!(
            registry,
            "agora_executions_succeeded_total",
            "Approved proposals applied by an executor"
        );
        let executions_failed = counter!(
            registry,
            "agora_executions_failed_total",
            "Execute calls that left the proposal Approved"
        );
        let reverts = counter!(registry, "agora_reverts_total", "Proposals reverted");

        let open_proposals = gauge!(
            registry,
            "agora_open_proposals",
            "Proposals currently accepting votes"
        );
        let awaiting_execution = gauge!(
            registry,
            "agora_awaiting_execution",
            "Approved proposals not yet executed"
        );

        let execution_time_ms = register_histogram_with_registry!(
            HistogramOpts::new("agora_execution_time_ms", "Execute call time in milliseconds")
                .buckets(vec![1.0, 5.0, 25.0, 100.0, 250.0, 1_000.0, 5_000.0, 30_000.0]),
            registry
        )
        .expect("failed to register agora_execution_time_ms");

        Self {
            registry,
            proposals_submitted,
            compliance_passed,
            compliance_rejected,
            votes_cast,
            tallies_approved,
            tallies_rejected,
            executions_succeeded,
            executions_failed,
            reverts,
            open_proposals,
            awaiting_execution,
            execution_time_ms,
        }
    }

    pub fn record_tally(&self, result: &TallyResult) {
        if result.approved {
            self.tallies_approved.inc();
        } else {
            self.tallies_rejected.inc();
        }
    }

    /// Encode every registered metric in the text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for GovernanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
