//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Coinbase websocket transport and subscription request.
pub mod coinbase;

/// Telegraf-style JSON metric parser.
pub mod parser;

/// Channel-backed record sink.
pub mod sink;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
