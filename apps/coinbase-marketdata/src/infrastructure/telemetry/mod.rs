//! Tracing Setup
//!
//! Installs the `tracing` subscriber for the ingest binary: an `EnvFilter`,
//! a fmt layer and, unless disabled, an OTLP/gRPC span exporter.
//!
//! Spans carry the ingest session: `feed_session` and `feed_teardown` record
//! `session_id`. The exported resource names the service, its version and
//! the feed address it reads from.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "false" to disable span export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: coinbase-marketdata)

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

const DEFAULT_SERVICE_NAME: &str = "coinbase-marketdata";

/// OTLP over gRPC.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Applied on top of `RUST_LOG`.
const FILTER_DIRECTIVES: [&str; 3] = [
    "coinbase_marketdata=info",
    "tungstenite=warn",
    "hyper=warn",
];

/// Telemetry setup failure.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A log filter directive did not parse.
    #[error("invalid log filter directive '{directive}': {source}")]
    Directive {
        /// The offending directive.
        directive: &'static str,
        /// Parser error.
        source: ParseError,
    },

    /// The OTLP exporter could not be built.
    #[error("failed to build OTLP exporter for {endpoint}: {reason}")]
    Exporter {
        /// Configured endpoint.
        endpoint: String,
        /// Builder error.
        reason: String,
    },

    /// A global subscriber was already installed.
    #[error("tracing subscriber already installed: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Shuts the tracer provider down, flushing pending spans, when dropped.
#[must_use = "dropping the guard stops span export"]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            // The subscriber may already be gone.
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Whether spans are exported.
    pub enabled: bool,
    /// OTLP gRPC endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
    /// Feed the service reads from, recorded on the exported resource.
    pub feed_address: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            feed_address: None,
        }
    }
}

impl TelemetryConfig {
    /// Read configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            enabled: lookup("OTEL_ENABLED").is_none_or(|v| !v.eq_ignore_ascii_case("false")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.otlp_endpoint),
            service_name: lookup("OTEL_SERVICE_NAME")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.service_name),
            feed_address: None,
        }
    }

    /// Record `address` on the exported resource.
    #[must_use]
    pub fn with_feed_address(mut self, address: impl Into<String>) -> Self {
        self.feed_address = Some(address.into());
        self
    }

    fn resource_attributes(&self) -> Vec<KeyValue> {
        let mut attributes = vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))];
        if let Some(address) = &self.feed_address {
            attributes.push(KeyValue::new("feed.address", address.clone()));
        }
        attributes
    }
}

fn env_filter() -> Result<EnvFilter, TelemetryError> {
    FILTER_DIRECTIVES
        .iter()
        .try_fold(EnvFilter::from_default_env(), |filter, &directive| {
            let parsed: Directive = directive
                .parse()
                .map_err(|source| TelemetryError::Directive { directive, source })?;
            Ok(filter.add_directive(parsed))
        })
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process.
///
/// # Errors
///
/// Returns [`TelemetryError`] if a filter directive is invalid, the exporter
/// cannot be built or a subscriber is already installed.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter()?)
            .with(fmt_layer)
            .try_init()?;
        return Ok(TelemetryGuard {
            tracer_provider: None,
        });
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            endpoint: config.otlp_endpoint.clone(),
            reason: e.to_string(),
        })?;

    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes(config.resource_attributes())
        .build();
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();
    let tracer = tracer_provider.tracer(config.service_name.clone());

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt_layer)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    })
}

// =============================================================================
// Tests
// =============================================================================
