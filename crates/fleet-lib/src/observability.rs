//! Observability infrastructure for the control-plane client
//!
//! Prometheus counters for API traffic, retry pressure and cache
//! effectiveness. All counters live in one global registry entry;
//! handles are cheap to clone and share it.

use std::sync::OnceLock;

use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ApiMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ApiMetricsInner {
    api_requests: IntCounter,
    api_retries: IntCounterVec,
    batch_rounds: IntCounter,
    cache_hits: IntCounterVec,
    cache_misses: IntCounterVec,
}

impl ApiMetricsInner {
    fn new() -> Self {
        Self {
            api_requests: register_int_counter!(
                "fleet_api_requests_total",
                "Total control-plane API requests issued"
            )
            .expect("Failed to register api_requests_total"),

            api_retries: register_int_counter_vec!(
                "fleet_api_retries_total",
                "Total API retries by cause",
                &["cause"]
            )
            .expect("Failed to register api_retries_total"),

            batch_rounds: register_int_counter!(
                "fleet_batch_rounds_total",
                "Total batch round trips submitted"
            )
            .expect("Failed to register batch_rounds_total"),

            cache_hits: register_int_counter_vec!(
                "fleet_lookup_cache_hits_total",
                "Lookup cache hits by cache",
                &["cache"]
            )
            .expect("Failed to register cache_hits_total"),

            cache_misses: register_int_counter_vec!(
                "fleet_lookup_cache_misses_total",
                "Lookup cache misses by cache",
                &["cache"]
            )
            .expect("Failed to register cache_misses_total"),
        }
    }
}

/// Control-plane client metrics
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ApiMetrics {
    _private: (),
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ApiMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ApiMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Count one issued API request
    pub fn inc_api_requests(&self) {
        self.inner().api_requests.inc();
    }

    /// Count one retry, by cause ("transient" or "timeout")
    pub fn inc_api_retries(&self, cause: &str) {
        self.inner().api_retries.with_label_values(&[cause]).inc();
    }

    /// Count one batch round trip
    pub fn inc_batch_rounds(&self) {
        self.inner().batch_rounds.inc();
    }

    /// Count a lookup cache hit for the named cache
    pub fn inc_cache_hit(&self, cache: &str) {
        self.inner().cache_hits.with_label_values(&[cache]).inc();
    }

    /// Count a lookup cache miss for the named cache
    pub fn inc_cache_miss(&self, cache: &str) {
        self.inner().cache_misses.with_label_values(&[cache]).inc();
    }
}
