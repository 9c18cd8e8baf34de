//! Observability for the dashboard backend
//!
//! Provides:
//! - Prometheus metrics (tracked entities, live readers, discovery and refresh activity)
//! - Structured lifecycle logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::info;

/// Histogram buckets for refresh latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Registered once per process
static GLOBAL_METRICS: OnceLock<DashboardMetricsInner> = OnceLock::new();

struct DashboardMetricsInner {
    entities_tracked: IntGauge,
    readers_active: IntGauge,
    discovery_passes: IntCounter,
    refresh_errors: IntCounter,
    entities_removed: IntCounter,
    refresh_latency_seconds: Histogram,
}

impl DashboardMetricsInner {
    fn new() -> Self {
        Self {
            entities_tracked: register_int_gauge!(
                "crtop_entities_tracked",
                "Number of containers currently in the connector registry"
            )
            .expect("Failed to register entities_tracked"),

            readers_active: register_int_gauge!(
                "crtop_readers_active",
                "Number of live metrics reader tasks"
            )
            .expect("Failed to register readers_active"),

            discovery_passes: register_int_counter!(
                "crtop_discovery_passes_total",
                "Total number of completed discovery passes"
            )
            .expect("Failed to register discovery_passes"),

            refresh_errors: register_int_counter!(
                "crtop_refresh_errors_total",
                "Total number of failed status refreshes"
            )
            .expect("Failed to register refresh_errors"),

            entities_removed: register_int_counter!(
                "crtop_entities_removed_total",
                "Total number of entities dropped from the registry"
            )
            .expect("Failed to register entities_removed"),

            refresh_latency_seconds: register_histogram!(
                "crtop_refresh_latency_seconds",
                "Time spent refreshing one entity from its backend",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register refresh_latency_seconds"),
        }
    }
}

/// Handle to the process-wide dashboard metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct DashboardMetrics {
    _private: (),
}

impl Default for DashboardMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DashboardMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DashboardMetricsInner {
        GLOBAL_METRICS.get_or_init(DashboardMetricsInner::new)
    }

    pub fn set_entities_tracked(&self, count: usize) {
        self.inner().entities_tracked.set(count as i64);
    }

    pub fn inc_readers_active(&self) {
        self.inner().readers_active.inc();
    }

    pub fn dec_readers_active(&self) {
        self.inner().readers_active.dec();
    }

    pub fn inc_discovery_passes(&self) {
        self.inner().discovery_passes.inc();
    }

    pub fn inc_refresh_errors(&self) {
        self.inner().refresh_errors.inc();
    }

    pub fn inc_entities_removed(&self) {
        self.inner().entities_removed.inc();
    }

    /// Record how long one refresh took
    pub fn observe_refresh_latency(&self, duration_secs: f64) {
        self.inner().refresh_latency_seconds.observe(duration_secs);
    }
}

/// Lifecycle events for the dashboard process
#[derive(Clone)]
pub struct StructuredLogger {
    connector: String,
}

impl StructuredLogger {
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
        }
    }

    pub fn log_startup(&self, version: &str, api_port: u16) {
        info!(
            event = "dashboard_started",
            connector = %self.connector,
            version = %version,
            api_port = api_port,
            "Container dashboard started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "dashboard_shutdown",
            connector = %self.connector,
            reason = %reason,
            "Container dashboard shutting down"
        );
    }
}
