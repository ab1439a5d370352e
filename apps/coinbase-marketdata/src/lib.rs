#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Coinbase Market Data Ingest
//!
//! Maintains one websocket connection to the Coinbase feed, normalizes
//! `ticker` and `l2update` events into typed records and forwards them,
//! through a generic record parser, to a downstream sink.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and transforms
//!   - `records`: Typed `Ticker` / `L2Update` records
//!   - `normalizer`: Raw event decoding and normalization
//!   - `metric`: Parser output rendered as line protocol
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport, parser, sink and metrics interfaces
//!   - `services`: Dispatch loop, connection lifecycle, ingest facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `coinbase`: WebSocket connector and subscribe request
//!   - `parser`: JSON to metric parser
//!   - `sink`: Bounded channel sink
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`: Prometheus exporter
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//! Coinbase WS ──► Lifecycle ──► Dispatch Loop ──► Normalizer ──► Parser ──► Sink
//!                 (owns conn)   (bounded tasks)   (0..N records)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Records and normalization with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Ingest error taxonomy.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::metric::{FieldValue, Metric};
pub use domain::normalizer::{
    DecodeError, EventKind, L2UpdateBatch, NormalizeError, RawEvent, decode_frame,
    normalize_l2update, normalize_ticker,
};
pub use domain::records::{L2Update, Ticker, TypedRecord};

// Ports
pub use application::ports::{
    Closer, Connection, Connector, FrameSource, FrameWriter, IngestMetrics, NoopMetrics,
    ParseError, RecordParser, RecordSink, TransportError,
};

// Services
pub use application::services::{
    ConnectionState, DispatchStats, FeedState, IngestHandle, MarketDataIngest,
};
pub use application::settings::{DispatchSettings, IngestOptions, IngestSettings, OverflowPolicy};

// Errors
pub use error::IngestError;

// Adapters
pub use infrastructure::coinbase::{SubscribeRequest, WsConnector};
pub use infrastructure::config::{ConfigError, IngestConfig};
pub use infrastructure::parser::{JsonMetricParser, JsonParserConfig};
pub use infrastructure::sink::{ChannelSink, SinkEvent};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{PrometheusMetrics, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
