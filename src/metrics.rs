//! Observability metrics for backup runs
//!
//! Counters and histograms are always recorded through the `metrics` facade.
//! They are only exported when [`init_metrics`] installs the Prometheus
//! scrape endpoint; otherwise recording is a no-op.
//!
//! ## Metrics
//!
//! - `api_requests_total{status}` / `api_request_duration_seconds`
//! - `api_retries_total` / `retry_backoff_duration_seconds`
//! - `records_fetched_total`
//! - `attachments_downloaded_total` / `attachments_failed_total`
//! - `sink_errors_total{format}`
//! - `tables_completed_total` / `tables_failed_total`

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

static METRICS_ADDR: OnceCell<SocketAddr> = OnceCell::new();

/// Metrics initialization errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Initialize the Prometheus exporter.
///
/// Idempotent: a second call returns immediately.
///
/// # Arguments
/// * `addr` - Socket address for the scrape endpoint (e.g., "127.0.0.1:9090")
///
/// # Errors
/// Returns [`MetricsError::Install`] if the listener cannot be bound
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if METRICS_ADDR.get().is_some() {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_counter!(
        "api_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the Airtable API"
    );
    describe_histogram!(
        "api_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_counter!("api_retries_total", Unit::Count, "Total number of retry attempts");
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_counter!(
        "records_fetched_total",
        Unit::Count,
        "Total number of records fetched"
    );
    describe_counter!(
        "attachments_downloaded_total",
        Unit::Count,
        "Total number of attachments written to disk"
    );
    describe_counter!(
        "attachments_failed_total",
        Unit::Count,
        "Total number of attachments that could not be downloaded"
    );
    describe_counter!(
        "sink_errors_total",
        Unit::Count,
        "Total number of sink write or close failures"
    );
    describe_counter!(
        "tables_completed_total",
        Unit::Count,
        "Tables whose fetch completed"
    );
    describe_counter!(
        "tables_failed_total",
        Unit::Count,
        "Tables whose fetch ended with a fatal error"
    );

    let _ = METRICS_ADDR.set(addr);
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

#[cfg(test)]
fn is_initialized() -> bool {
    METRICS_ADDR.get().is_some()
}

/// Record one HTTP attempt
pub fn record_api_request(status: &str, duration: Duration) {
    counter!("api_requests_total", "status" => status.to_string()).increment(1);
    histogram!("api_request_duration_seconds").record(duration.as_secs_f64());
}

/// Record a retry backoff
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("api_retries_total").increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Record records received in one page
pub fn record_records_fetched(count: usize) {
    counter!("records_fetched_total").increment(count as u64);
}

/// Record an attachment outcome
pub fn record_attachment(success: bool) {
    if success {
        counter!("attachments_downloaded_total").increment(1);
    } else {
        counter!("attachments_failed_total").increment(1);
    }
}

/// Record a sink failure
pub fn record_sink_error(format: &str) {
    counter!("sink_errors_total", "format" => format.to_string()).increment(1);
}

/// Record a table reaching a terminal state
pub fn record_table_outcome(completed: bool) {
    if completed {
        counter!("tables_completed_total").increment(1);
    } else {
        counter!("tables_failed_total").increment(1);
    }
}
