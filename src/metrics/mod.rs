/// Prometheus metrics for the analytics service.
///
/// Everything registers into one global registry under the
/// `cmdb_analytics` namespace and is exposed on `GET /metrics`:
/// - recompute passes per view and scope, with their duration
/// - coalesced and superseded recompute requests
/// - invalid execution records excluded from aggregation
/// - stale reads and per-view staleness
/// - HTTP request tracking
///
/// # Example
/// ```no_run
/// use cmdb_report_analytics::metrics::VIEW_RECOMPUTE_TOTAL;
///
/// VIEW_RECOMPUTE_TOTAL
///     .with_label_values(&["reports_summary", "full", "success"])
///     .inc();
/// ```

mod config;
mod middleware;

pub use config::MetricsConfig;
pub use middleware::MetricsMiddleware;

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts,
    Registry,
};
use std::sync::Arc;

const NAMESPACE: &str = "cmdb_analytics";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Total number of HTTP requests received
    ///
    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests")
            .namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// HTTP request duration in seconds
    ///
    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    /// Number of in-flight HTTP requests
    pub static ref HTTP_CONNECTIONS_ACTIVE: Gauge = Gauge::with_opts(
        Opts::new("http_connections_active", "Number of in-flight HTTP requests")
            .namespace(NAMESPACE)
    ).expect("Failed to create HTTP_CONNECTIONS_ACTIVE metric");

    // ============================================================================
    // Aggregator Metrics
    // ============================================================================

    /// Recompute passes that ran
    ///
    /// Labels: view, scope, outcome
    pub static ref VIEW_RECOMPUTE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("view_recompute_total", "Recompute passes per view")
            .namespace(NAMESPACE),
        &["view", "scope", "outcome"]
    ).expect("Failed to create VIEW_RECOMPUTE_TOTAL metric");

    /// Duration of a recompute pass
    ///
    /// Labels: view, scope
    pub static ref VIEW_RECOMPUTE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "view_recompute_duration_seconds",
            "Duration of a view recompute pass in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["view", "scope"]
    ).expect("Failed to create VIEW_RECOMPUTE_DURATION_SECONDS metric");

    /// Requests that joined a pass already in flight
    ///
    /// Labels: view
    pub static ref VIEW_RECOMPUTE_COALESCED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("view_recompute_coalesced_total", "Recompute requests served by an in-flight pass")
            .namespace(NAMESPACE),
        &["view"]
    ).expect("Failed to create VIEW_RECOMPUTE_COALESCED_TOTAL metric");

    /// In-flight passes discarded for a newer one
    ///
    /// Labels: view
    pub static ref VIEW_RECOMPUTE_SUPERSEDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("view_recompute_superseded_total", "Recompute passes superseded before commit")
            .namespace(NAMESPACE),
        &["view"]
    ).expect("Failed to create VIEW_RECOMPUTE_SUPERSEDED_TOTAL metric");

    /// Malformed execution records excluded from aggregation
    ///
    /// Labels: view
    pub static ref INVALID_EXECUTION_RECORDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("invalid_execution_records_total", "Execution records skipped as malformed")
            .namespace(NAMESPACE),
        &["view"]
    ).expect("Failed to create INVALID_EXECUTION_RECORDS_TOTAL metric");

    /// Rows in the published snapshot
    ///
    /// Labels: view
    pub static ref VIEW_ROWS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("view_rows", "Rows in the published snapshot of a view")
            .namespace(NAMESPACE),
        &["view"]
    ).expect("Failed to create VIEW_ROWS metric");

    // ============================================================================
    // Refresh Scheduler Metrics
    // ============================================================================

    /// Reads answered from a snapshot older than its staleness bound
    ///
    /// Labels: view, mode
    pub static ref STALE_READS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("stale_reads_total", "Reads served from a stale snapshot")
            .namespace(NAMESPACE),
        &["view", "mode"]
    ).expect("Failed to create STALE_READS_TOTAL metric");

    /// Age of the published snapshot at the last scheduler tick
    ///
    /// Labels: view
    pub static ref VIEW_STALENESS_SECONDS: GaugeVec = GaugeVec::new(
        Opts::new("view_staleness_seconds", "Age of the published snapshot in seconds")
            .namespace(NAMESPACE),
        &["view"]
    ).expect("Failed to create VIEW_STALENESS_SECONDS metric");

    /// Refresh attempts deferred by backoff
    ///
    /// Labels: view
    pub static ref REFRESH_BACKOFF_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("refresh_backoff_total", "Refreshes postponed after a source failure")
            .namespace(NAMESPACE),
        &["view"]
    ).expect("Failed to create REFRESH_BACKOFF_TOTAL metric");

    // ============================================================================
    // Alert Metrics
    // ============================================================================

    /// Active performance alerts
    ///
    /// Labels: alert_type, severity
    pub static ref PERFORMANCE_ALERTS_ACTIVE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("performance_alerts_active", "Active performance alerts")
            .namespace(NAMESPACE),
        &["alert_type", "severity"]
    ).expect("Failed to create PERFORMANCE_ALERTS_ACTIVE metric");

    // ============================================================================
    // System Metrics
    // ============================================================================

    /// Application build information
    ///
    /// Labels: version
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Application build information")
            .namespace(NAMESPACE),
        &["version"]
    ).expect("Failed to create BUILD_INFO metric");
}

/// Register every metric with the global registry
pub fn init_metrics() -> Result<(), prometheus::Error> {
    // Register HTTP metrics
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_CONNECTIONS_ACTIVE.clone()))?;

    // Register aggregator metrics
    PROMETHEUS_REGISTRY.register(Box::new(VIEW_RECOMPUTE_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(VIEW_RECOMPUTE_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(VIEW_RECOMPUTE_COALESCED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(VIEW_RECOMPUTE_SUPERSEDED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(INVALID_EXECUTION_RECORDS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(VIEW_ROWS.clone()))?;

    // Register scheduler metrics
    PROMETHEUS_REGISTRY.register(Box::new(STALE_READS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(VIEW_STALENESS_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(REFRESH_BACKOFF_TOTAL.clone()))?;

    // Register alert metrics
    PROMETHEUS_REGISTRY.register(Box::new(PERFORMANCE_ALERTS_ACTIVE.clone()))?;

    // Register system metrics
    PROMETHEUS_REGISTRY.register(Box::new(BUILD_INFO.clone()))?;

    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Encode the registry in the Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
