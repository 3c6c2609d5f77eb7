//! Observability adapter (C18): counters/histograms/gauges on a `prometheus::Registry`,
//! hidden behind this struct so callers never touch the `prometheus` crate directly.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::Result;

const DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.0, 5.0, 10.0, 30.0];
const TOKEN_BUCKETS: &[f64] = &[100.0, 500.0, 1_000.0, 2_000.0, 5_000.0, 10_000.0];

/// Pre-registered Prometheus series matching the names in the metrics catalog.
/// `Metrics::render` produces the text-exposition body for an embedding HTTP
/// surface to serve; serving it is out of scope here.
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    errors_429_total: IntCounterVec,
    requests_failed_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    provider_latency_seconds: HistogramVec,
    tokens_consumed: HistogramVec,
    tokens_total: IntCounterVec,
    rate_limit_rpm_limit: prometheus::GaugeVec,
    rate_limit_burst_capacity: prometheus::GaugeVec,
    rate_limit_tokens_capacity: prometheus::GaugeVec,
    rate_limit_tokens_available: prometheus::GaugeVec,
    rate_limit_window_occupancy: prometheus::GaugeVec,
    quota_usage_percent: prometheus::GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total execute() calls by outcome"),
            &["provider", "agent", "status"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let errors_429_total = IntCounterVec::new(
            Opts::new("errors_429_total", "Upstream 429 responses observed"),
            &["provider"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let requests_failed_total = IntCounterVec::new(
            Opts::new("requests_failed_total", "Failed requests by error kind"),
            &["provider", "agent", "error_type"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "End-to-end execute() duration")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["provider", "agent"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let provider_latency_seconds = HistogramVec::new(
            HistogramOpts::new("provider_latency_seconds", "Upstream adapter call latency")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["provider"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let tokens_consumed = HistogramVec::new(
            HistogramOpts::new("tokens_consumed", "Token count distribution per call")
                .buckets(TOKEN_BUCKETS.to_vec()),
            &["provider", "type"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let tokens_total = IntCounterVec::new(
            Opts::new("tokens_total", "Cumulative tokens consumed"),
            &["provider", "type"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let rate_limit_rpm_limit = prometheus::GaugeVec::new(
            Opts::new("rate_limit_rpm_limit", "Configured requests-per-minute limit"),
            &["provider"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let rate_limit_burst_capacity = prometheus::GaugeVec::new(
            Opts::new("rate_limit_burst_capacity", "Configured token bucket burst capacity"),
            &["provider"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let rate_limit_tokens_capacity = prometheus::GaugeVec::new(
            Opts::new("rate_limit_tokens_capacity", "Token bucket capacity"),
            &["provider"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let rate_limit_tokens_available = prometheus::GaugeVec::new(
            Opts::new("rate_limit_tokens_available", "Token bucket tokens currently available"),
            &["provider"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let rate_limit_window_occupancy = prometheus::GaugeVec::new(
            Opts::new("rate_limit_window_occupancy", "Sliding window occupancy"),
            &["provider"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        let quota_usage_percent = prometheus::GaugeVec::new(
            Opts::new("quota_usage_percent", "Percent of quota consumed"),
            &["provider", "quota_type"],
        )
        .map_err(|e| crate::Error::other(e.to_string()))?;

        for collector in [
            Box::new(requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(errors_429_total.clone()),
            Box::new(requests_failed_total.clone()),
            Box::new(request_duration_seconds.clone()),
            Box::new(provider_latency_seconds.clone()),
            Box::new(tokens_consumed.clone()),
            Box::new(tokens_total.clone()),
            Box::new(rate_limit_rpm_limit.clone()),
            Box::new(rate_limit_burst_capacity.clone()),
            Box::new(rate_limit_tokens_capacity.clone()),
            Box::new(rate_limit_tokens_available.clone()),
            Box::new(rate_limit_window_occupancy.clone()),
            Box::new(quota_usage_percent.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| crate::Error::other(e.to_string()))?;
        }

        Ok(Self {
            registry,
            requests_total,
            errors_429_total,
            requests_failed_total,
            request_duration_seconds,
            provider_latency_seconds,
            tokens_consumed,
            tokens_total,
            rate_limit_rpm_limit,
            rate_limit_burst_capacity,
            rate_limit_tokens_capacity,
            rate_limit_tokens_available,
            rate_limit_window_occupancy,
            quota_usage_percent,
        })
    }

    pub fn record_request(&self, provider: &str, agent: &str, status: &str) {
        self.requests_total.with_label_values(&[provider, agent, status]).inc();
    }

    pub fn record_429(&self, provider: &str) {
        self.errors_429_total.with_label_values(&[provider]).inc();
    }

    pub fn record_failure(&self, provider: &str, agent: &str, error_type: &str) {
        self.requests_failed_total
            .with_label_values(&[provider, agent, error_type])
            .inc();
    }

    pub fn observe_request_duration(&self, provider: &str, agent: &str, seconds: f64) {
        self.request_duration_seconds
            .with_label_values(&[provider, agent])
            .observe(seconds);
    }

    pub fn observe_provider_latency(&self, provider: &str, seconds: f64) {
        self.provider_latency_seconds.with_label_values(&[provider]).observe(seconds);
    }

    pub fn record_tokens(&self, provider: &str, token_type: &str, count: u32) {
        self.tokens_consumed
            .with_label_values(&[provider, token_type])
            .observe(count as f64);
        self.tokens_total
            .with_label_values(&[provider, token_type])
            .inc_by(count as u64);
    }

    pub fn set_rpm_limit(&self, provider: &str, rpm: f64) {
        self.rate_limit_rpm_limit.with_label_values(&[provider]).set(rpm);
    }

    pub fn set_burst_capacity(&self, provider: &str, burst: f64) {
        self.rate_limit_burst_capacity.with_label_values(&[provider]).set(burst);
    }

    pub fn set_tokens_capacity(&self, provider: &str, capacity: f64) {
        self.rate_limit_tokens_capacity.with_label_values(&[provider]).set(capacity);
    }

    pub fn set_tokens_available(&self, provider: &str, available: f64) {
        self.rate_limit_tokens_available.with_label_values(&[provider]).set(available);
    }

    pub fn set_window_occupancy(&self, provider: &str, occupancy: f64) {
        self.rate_limit_window_occupancy.with_label_values(&[provider]).set(occupancy);
    }

    pub fn set_quota_usage_percent(&self, provider: &str, quota_type: &str, percent: f64) {
        self.quota_usage_percent
            .with_label_values(&[provider, quota_type])
            .set(percent);
    }

    /// Renders the text-exposition body for an embedding HTTP surface to serve.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .map_err(|e| crate::Error::other(e.to_string()))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("static metric registration never fails")
    }
}
