//! Prometheus metrics registry for the aggregator.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the pollers and HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry,
};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Poll attempts, labelled by task name.
    pub polls_total: CounterVec,
    /// Per-sensor poll failures, labelled by task name.
    pub poll_errors_total: CounterVec,
    /// Rows committed, labelled by table.
    pub rows_inserted_total: CounterVec,
    /// Rows the store rejected, labelled by table.
    pub rows_failed_total: CounterVec,
    /// Keys pulled from sensors into the aggregator, labelled by key kind.
    pub keys_pulled_total: CounterVec,
    /// Keys pushed to sensors, labelled by key kind.
    pub keys_pushed_total: CounterVec,
    pub events_inspected_total: Counter,
    pub alerts_created_total: Counter,
    pub digests_sent_total: Counter,
    pub digest_failures_total: Counter,
    /// Sensors currently in the directory.
    pub registered_sensors: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls_total = CounterVec::new(
            Opts::new("wids_aggregator_polls_total", "Poll attempts by task"),
            &["task"],
        )?;
        let poll_errors_total = CounterVec::new(
            Opts::new("wids_aggregator_poll_errors_total", "Failed per-sensor polls by task"),
            &["task"],
        )?;
        let rows_inserted_total = CounterVec::new(
            Opts::new("wids_aggregator_rows_inserted_total", "Rows committed by table"),
            &["table"],
        )?;
        let rows_failed_total = CounterVec::new(
            Opts::new("wids_aggregator_rows_failed_total", "Rows rejected by table"),
            &["table"],
        )?;
        let keys_pulled_total = CounterVec::new(
            Opts::new("wids_aggregator_keys_pulled_total", "Keys learned from sensors"),
            &["kind"],
        )?;
        let keys_pushed_total = CounterVec::new(
            Opts::new("wids_aggregator_keys_pushed_total", "Keys pushed to sensors"),
            &["kind"],
        )?;

        let events_inspected_total = Counter::with_opts(Opts::new(
            "wids_aggregator_events_inspected_total",
            "Raw events claimed by inspection passes",
        ))?;
        let alerts_created_total = Counter::with_opts(Opts::new(
            "wids_aggregator_alerts_created_total",
            "Alerts created after cooldown filtering",
        ))?;
        let digests_sent_total = Counter::with_opts(Opts::new(
            "wids_aggregator_digests_sent_total",
            "Alert digests delivered",
        ))?;
        let digest_failures_total = Counter::with_opts(Opts::new(
            "wids_aggregator_digest_failures_total",
            "Alert digest delivery failures",
        ))?;
        let registered_sensors = Gauge::with_opts(Opts::new(
            "wids_aggregator_registered_sensors",
            "Sensors in the directory",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "wids_aggregator_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wids_aggregator_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(polls_total.clone()))?;
        registry.register(Box::new(poll_errors_total.clone()))?;
        registry.register(Box::new(rows_inserted_total.clone()))?;
        registry.register(Box::new(rows_failed_total.clone()))?;
        registry.register(Box::new(keys_pulled_total.clone()))?;
        registry.register(Box::new(keys_pushed_total.clone()))?;
        registry.register(Box::new(events_inspected_total.clone()))?;
        registry.register(Box::new(alerts_created_total.clone()))?;
        registry.register(Box::new(digests_sent_total.clone()))?;
        registry.register(Box::new(digest_failures_total.clone()))?;
        registry.register(Box::new(registered_sensors.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            polls_total,
            poll_errors_total,
            rows_inserted_total,
            rows_failed_total,
            keys_pulled_total,
            keys_pushed_total,
            events_inspected_total,
            alerts_created_total,
            digests_sent_total,
            digest_failures_total,
            registered_sensors,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
