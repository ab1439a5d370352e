//! Prometheus Metrics Module
//!
//! Exposes ingest metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Frames received from the feed and frames dropped on overflow
//! - **Records**: Metrics forwarded to the sink by record type
//! - **Errors**: Ingest errors by kind
//! - **Dispatch**: Per-frame work currently in flight
//! - **Connection**: Lifecycle state of the feed connection
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. The ingest
//! core reports through [`PrometheusMetrics`], its `IngestMetrics` adapter.
//! Recording is a no-op until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::ports::IngestMetrics;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "coinbase_ingest_frames_received_total",
        "Total text frames received from the feed"
    );
    describe_counter!(
        "coinbase_ingest_frames_dropped_total",
        "Total frames discarded because dispatch was saturated"
    );
    describe_counter!(
        "coinbase_ingest_records_forwarded_total",
        "Total metrics handed to the downstream sink"
    );
    describe_counter!(
        "coinbase_ingest_sink_dropped_total",
        "Total metrics the sink could not accept"
    );
    describe_counter!(
        "coinbase_ingest_errors_total",
        "Total ingest errors by kind"
    );
    describe_gauge!(
        "coinbase_ingest_frames_in_flight",
        "Frames currently being normalized and forwarded"
    );
    describe_gauge!(
        "coinbase_ingest_connection_state",
        "Connection lifecycle state (0=unconnected .. 5=closed, 6=failed)"
    );
    describe_histogram!(
        "coinbase_ingest_frame_processing_seconds",
        "Time to decode, normalize and forward one frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the feed.
pub fn record_frame_received() {
    counter!("coinbase_ingest_frames_received_total").increment(1);
}

/// Record a frame dropped by the overflow policy.
pub fn record_frame_dropped() {
    counter!("coinbase_ingest_frames_dropped_total").increment(1);
}

/// Record a metric forwarded to the sink.
pub fn record_forwarded(record_type: &'static str) {
    counter!(
        "coinbase_ingest_records_forwarded_total",
        "record_type" => record_type
    )
    .increment(1);
}

/// Record a metric the sink had to drop.
pub fn record_sink_dropped() {
    counter!("coinbase_ingest_sink_dropped_total").increment(1);
}

/// Record an ingest error.
pub fn record_error(kind: &'static str) {
    counter!(
        "coinbase_ingest_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Update the in-flight frame gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_frames_in_flight(count: usize) {
    gauge!("coinbase_ingest_frames_in_flight").set(count as f64);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: u8) {
    gauge!("coinbase_ingest_connection_state").set(f64::from(state));
}

/// Record frame processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("coinbase_ingest_frame_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Port Adapter
// =============================================================================

/// Exports ingest counters to the Prometheus recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl IngestMetrics for PrometheusMetrics {
    fn frame_received(&self) {
        record_frame_received();
    }

    fn frame_dropped(&self) {
        record_frame_dropped();
    }

    fn record_forwarded(&self, record_type: &'static str) {
        record_forwarded(record_type);
    }

    fn error_reported(&self, kind: &'static str) {
        record_error(kind);
    }

    fn frames_in_flight(&self, count: usize) {
        set_frames_in_flight(count);
    }

    fn frame_processed(&self, elapsed: Duration) {
        record_processing_duration(elapsed);
    }

    fn connection_state(&self, code: u8) {
        set_connection_state(code);
    }
}

// =============================================================================
// Tests
// =============================================================================
