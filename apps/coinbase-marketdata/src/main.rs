//! Coinbase Market Data Ingest Binary
//!
//! Connects to the Coinbase websocket feed, normalizes ticker and level2
//! events and prints the resulting metrics as Influx line protocol on stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin coinbase-marketdata
//! ```
//!
//! # Environment Variables
//!
//! - `COINBASE_SERVICE_ADDRESS`: Feed URI (default: wss://ws-feed.pro.coinbase.com)
//! - `COINBASE_ON_CONNECT_MSG`: Subscription frame, sent verbatim
//! - `COINBASE_PRODUCT_IDS`: Products for the default subscription (default: ETH-USD)
//! - `COINBASE_CHANNELS`: Channels for the default subscription (default: level2,heartbeat,ticker)
//! - `INGEST_MAX_IN_FLIGHT`: Frames processed concurrently (default: 256)
//! - `INGEST_OVERFLOW_POLICY`: block | drop (default: block)
//! - `INGEST_CONNECT_TIMEOUT_SECS`: Connect timeout (default: 10)
//! - `INGEST_SINK_CAPACITY`: Output channel capacity (default: 4096)
//! - `INGEST_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: coinbase-marketdata)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use coinbase_marketdata::infrastructure::health::{HealthServer, HealthServerState};
use coinbase_marketdata::infrastructure::telemetry::{self, TelemetryConfig};
use coinbase_marketdata::{
    ChannelSink, IngestConfig, JsonMetricParser, MarketDataIngest, PrometheusMetrics, SinkEvent,
    WsConnector, init_metrics,
};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let config = IngestConfig::from_env().context("invalid configuration")?;

    let _telemetry_guard = telemetry::init(
        &TelemetryConfig::from_env().with_feed_address(&config.feed.service_address),
    )
    .context("failed to initialize telemetry")?;

    tracing::info!("Starting Coinbase market data ingest");

    let _metrics_handle = init_metrics();
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let (sink, events) = ChannelSink::new(config.sink_capacity);
    let printer = tokio::spawn(print_events(events));

    let ingest = MarketDataIngest::new(
        Arc::new(WsConnector::new()),
        Arc::new(JsonMetricParser::default()),
        Arc::new(sink),
    )
    .with_options(config.ingest_options())
    .with_metrics(Arc::new(PrometheusMetrics));

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            ingest.feed_state(),
            ingest.stats(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server failed");
            }
        });
    }

    let handle = ingest
        .start(&config.ingest_settings())
        .await
        .context("failed to start feed")?;

    tokio::select! {
        () = await_shutdown() => {}
        () = handle.read_finished() => {
            tracing::warn!("Feed read path ended");
        }
    }

    shutdown_token.cancel();
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.stop())
        .await
        .is_err()
    {
        tracing::warn!("Feed did not stop within the shutdown timeout");
    }

    let stats = ingest.stats();
    tracing::info!(
        frames_received = stats.frames_received(),
        frames_dropped = stats.frames_dropped(),
        records_forwarded = stats.records_forwarded(),
        errors_reported = stats.errors_reported(),
        "Ingest finished"
    );

    drop(handle);
    drop(ingest);
    match printer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed writing metrics to stdout"),
        Err(e) => tracing::error!(error = %e, "Output task failed"),
    }

    Ok(())
}

/// Drain the sink, writing each metric as one line protocol line.
async fn print_events(mut events: mpsc::Receiver<SinkEvent>) -> std::io::Result<()> {
    let mut out = BufWriter::new(tokio::io::stdout());
    while let Some(event) = events.recv().await {
        match event {
            SinkEvent::Metric(metric) => {
                out.write_all(metric.to_line_protocol().as_bytes()).await?;
                out.write_all(b"\n").await?;
                if events.is_empty() {
                    out.flush().await?;
                }
            }
            SinkEvent::Error(e) => {
                tracing::debug!(kind = e.kind(), "Error event drained");
            }
        }
    }
    out.flush().await
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        service_address = %config.feed.service_address,
        max_in_flight = config.dispatch.max_in_flight,
        overflow = config.dispatch.overflow.as_str(),
        connect_timeout_secs = config.connect_timeout.as_secs(),
        sink_capacity = config.sink_capacity,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
