//! Production observability metrics for the collector
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for scraping endpoint (`--metrics-addr`)
//! - Recording is a no-op until [`init_metrics`] installs the exporter
//!
//! Metrics are emitted by [`crate::collector::LogReporter`] from collection
//! events; the collection core itself never touches this module.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics system with Prometheus exporter
///
/// This should be called once at application startup, typically in main().
/// The function is idempotent and will not reinitialize if already called.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "collector_requests_total",
        Unit::Count,
        "Pages fetched successfully, by exchange"
    );
    describe_counter!(
        "collector_failures_total",
        Unit::Count,
        "Failed fetch steps, by exchange and failure class"
    );
    describe_counter!(
        "collector_records_appended_total",
        Unit::Count,
        "Records appended to the sink"
    );
    describe_counter!(
        "collector_duplicates_total",
        Unit::Count,
        "Records rejected by the sink as duplicates"
    );
    describe_gauge!(
        "collector_loops_running",
        Unit::Count,
        "Collection loops currently running"
    );
    describe_histogram!(
        "collector_rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate-limit token"
    );
    describe_histogram!(
        "collector_backoff_seconds",
        Unit::Seconds,
        "Backoff applied before retrying a page"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record a collected page
pub fn record_page(exchange: &str, appended: u64, duplicates: u64) {
    counter!("collector_requests_total", "exchange" => exchange.to_string()).increment(1);
    counter!("collector_records_appended_total", "exchange" => exchange.to_string())
        .increment(appended);
    counter!("collector_duplicates_total", "exchange" => exchange.to_string())
        .increment(duplicates);
}

/// Record a failed fetch step
pub fn record_failure(exchange: &str, class: &'static str) {
    counter!(
        "collector_failures_total",
        "exchange" => exchange.to_string(),
        "class" => class,
    )
    .increment(1);
}

/// Record time spent waiting on the rate limiter
pub fn record_rate_limit_wait(exchange: &str, waited: Duration) {
    histogram!("collector_rate_limit_wait_seconds", "exchange" => exchange.to_string())
        .record(waited.as_secs_f64());
}

/// Record a retry backoff
pub fn record_backoff(exchange: &str, delay: Duration) {
    histogram!("collector_backoff_seconds", "exchange" => exchange.to_string())
        .record(delay.as_secs_f64());
}

/// Adjust the running-loops gauge
pub fn set_loop_running(running: bool) {
    if running {
        gauge!("collector_loops_running").increment(1.0);
    } else {
        gauge!("collector_loops_running").decrement(1.0);
    }
}
