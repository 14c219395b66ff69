//! Prometheus metrics for the Baton node.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`] that the HTTP `/metrics`
//! endpoint encodes into the Prometheus text exposition format.

use baton_rotation::RotationReport;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::NodeError;

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Scan-path attempts by operation and outcome code.
    pub scans_total: IntCounterVec,
    /// Successful chain hops.
    pub hops_total: IntCounter,
    /// Writes that lost an optimistic-concurrency race.
    pub version_conflicts_total: IntCounter,
    pub rate_limited_total: IntCounter,
    pub location_blocks_total: IntCounter,
    pub chains_seeded_total: IntCounter,
    pub chains_closed_total: IntCounter,
    pub rotation_passes_total: IntCounter,
    /// Replacement chain tokens plus fresh standalone tokens.
    pub rotation_tokens_created_total: IntCounter,
    pub rotation_tokens_expired_total: IntCounter,
    pub rotation_chains_stalled_total: IntCounter,
    pub rotation_tokens_purged_total: IntCounter,
    pub rotation_failures_total: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Connected WebSocket subscribers.
    pub event_subscribers: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Time spent handling a scan-path request, in milliseconds.
    pub scan_latency_ms: Histogram,
    /// Time spent in one rotation pass, in milliseconds.
    pub rotation_time_ms: Histogram,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let scans_total = register_int_counter_vec_with_registry!(
            Opts::new("baton_scans_total", "Scan-path attempts by operation and outcome"),
            &["operation", "outcome"],
            registry
        )
        .expect("failed to register scans_total counter");

        let counter = |name: &str, help: &str| {
            register_int_counter_with_registry!(Opts::new(name, help), registry)
                .expect("failed to register counter")
        };
        let hops_total = counter("baton_hops_total", "Successful chain hops");
        let version_conflicts_total = counter(
            "baton_version_conflicts_total",
            "Requests rejected by a conditional-write conflict",
        );
        let rate_limited_total =
            counter("baton_rate_limited_total", "Scan attempts denied by the rate limiter");
        let location_blocks_total = counter(
            "baton_location_blocks_total",
            "Scan attempts blocked by an enforced geofence",
        );
        let chains_seeded_total = counter("baton_chains_seeded_total", "Chains created by seeding");
        let chains_closed_total =
            counter("baton_chains_closed_total", "Chains transitioned to completed");
        let rotation_passes_total =
            counter("baton_rotation_passes_total", "Rotation passes executed");
        let rotation_tokens_created_total = counter(
            "baton_rotation_tokens_created_total",
            "Tokens minted by rotation",
        );
        let rotation_tokens_expired_total = counter(
            "baton_rotation_tokens_expired_total",
            "Tokens marked expired by the rotation sweep",
        );
        let rotation_chains_stalled_total = counter(
            "baton_rotation_chains_stalled_total",
            "Chains classified as stalled",
        );
        let rotation_tokens_purged_total = counter(
            "baton_rotation_tokens_purged_total",
            "Spent tokens deleted by rotation",
        );
        let rotation_failures_total = counter(
            "baton_rotation_failures_total",
            "Rotation units that failed",
        );

        let event_subscribers = register_int_gauge_with_registry!(
            Opts::new("baton_event_subscribers", "Connected WebSocket event subscribers"),
            registry
        )
        .expect("failed to register event_subscribers gauge");

        let scan_latency_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "baton_scan_latency_ms",
                "Scan-path request handling time in milliseconds"
            )
            .buckets(vec![1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
            registry
        )
        .expect("failed to register scan_latency_ms histogram");

        let rotation_time_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "baton_rotation_time_ms",
                "Rotation pass duration in milliseconds"
            )
            .buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]),
            registry
        )
        .expect("failed to register rotation_time_ms histogram");

        Self {
            registry,
            scans_total,
            hops_total,
            version_conflicts_total,
            rate_limited_total,
            location_blocks_total,
            chains_seeded_total,
            chains_closed_total,
            rotation_passes_total,
            rotation_tokens_created_total,
            rotation_tokens_expired_total,
            rotation_chains_stalled_total,
            rotation_tokens_purged_total,
            rotation_failures_total,
            event_subscribers,
            scan_latency_ms,
            rotation_time_ms,
        }
    }

    /// Count one scan-path attempt. `outcome` is `OK` or an error code.
    pub fn record_scan(&self, operation: &str, outcome: &str, elapsed_ms: f64) {
        self.scans_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.scan_latency_ms.observe(elapsed_ms);
        match outcome {
            "VERSION_CONFLICT" => self.version_conflicts_total.inc(),
            "RATE_LIMITED" => self.rate_limited_total.inc(),
            "LOCATION_VIOLATION" => self.location_blocks_total.inc(),
            _ => {}
        }
    }

    pub fn record_rotation(&self, report: &RotationReport, elapsed_ms: f64) {
        self.rotation_passes_total.inc();
        self.rotation_tokens_created_total.inc_by(report.created as u64);
        self.rotation_tokens_expired_total.inc_by(report.expired as u64);
        self.rotation_chains_stalled_total.inc_by(report.stalled as u64);
        self.rotation_tokens_purged_total.inc_by(report.purged as u64);
        self.rotation_failures_total.inc_by(report.failures as u64);
        self.rotation_time_ms.observe(elapsed_ms);
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| NodeError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| NodeError::Metrics(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
