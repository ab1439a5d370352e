//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: Opens the duplex frame channel to the feed
//! - `FrameSource`: Read half of an open channel
//! - `FrameWriter` / `Closer`: Write half of an open channel, owns closing it
//! - `RecordParser`: Turns a normalized JSON payload into metrics
//! - `RecordSink`: Accepts metrics and diagnostics
//! - `IngestMetrics`: Receives ingest counters for export

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::metric::Metric;
use crate::error::IngestError;

// =============================================================================
// Transport
// =============================================================================

/// Transport-level failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Underlying websocket/protocol error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,

    /// A frame arrived that cannot be represented as text.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Read half of an open connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next text frame.
    ///
    /// Returns `None` once the peer has closed the stream. Control frames
    /// (ping/pong) are handled by the adapter and never surface here.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// Releases the underlying connection.
#[async_trait]
pub trait Closer: Send {
    /// Close the connection. Called at most once per connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Write half of an open connection.
#[async_trait]
pub trait FrameWriter: Closer {
    /// Send one text frame.
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;
}

/// An open duplex connection, split into its halves.
pub struct Connection {
    /// Read half, lent to the dispatch loop.
    pub source: Box<dyn FrameSource>,
    /// Write half, kept by the lifecycle manager.
    pub writer: Box<dyn FrameWriter>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to a service address.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial `address` and return the split connection.
    async fn connect(&self, address: &str) -> Result<Connection, TransportError>;
}

// =============================================================================
// Record Parser
// =============================================================================

/// The parser rejected a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Payload is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    /// Payload is not a JSON object (or array of objects).
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// The measurement name key is missing or not a string.
    #[error("missing measurement name key '{0}'")]
    MissingName(String),

    /// The time key could not be parsed.
    #[error("invalid timestamp in '{key}': {value}")]
    InvalidTimestamp {
        /// Key holding the timestamp.
        key: String,
        /// Raw value that failed to parse.
        value: String,
    },
}

/// Turns a normalized JSON payload into zero or more metrics.
#[cfg_attr(test, mockall::automock)]
pub trait RecordParser: Send + Sync {
    /// Parse one payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the payload cannot be converted.
    fn parse(&self, payload: &[u8]) -> Result<Vec<Metric>, ParseError>;
}

// =============================================================================
// Record Sink
// =============================================================================

/// Downstream consumer of metrics, with a diagnostic side channel.
///
/// Both methods may be called concurrently from several dispatch tasks and
/// must not block.
pub trait RecordSink: Send + Sync {
    /// Accept one metric (best-effort).
    fn add_record(&self, metric: Metric);

    /// Report a non-fatal error.
    fn add_error(&self, error: IngestError);
}

// =============================================================================
// Ingest Metrics
// =============================================================================

/// Receives ingest counters and gauges for export.
///
/// Every method defaults to a no-op. Calls come from the read path and from
/// concurrent frame tasks.
pub trait IngestMetrics: Send + Sync {
    /// A text frame was read from the transport.
    fn frame_received(&self) {}

    /// A frame was discarded because dispatch was saturated.
    fn frame_dropped(&self) {}

    /// A metric derived from a `record_type` record reached the sink.
    fn record_forwarded(&self, _record_type: &'static str) {}

    /// A non-fatal error of `kind` was reported.
    fn error_reported(&self, _kind: &'static str) {}

    /// Frames currently being processed.
    fn frames_in_flight(&self, _count: usize) {}

    /// One frame was decoded, normalized and forwarded.
    fn frame_processed(&self, _elapsed: Duration) {}

    /// The connection moved to the state with discriminant `code`.
    fn connection_state(&self, _code: u8) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl IngestMetrics for NoopMetrics {}
