//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (websocket, parser, sink).
pub mod ports;

/// Application services for dispatch, connection lifecycle and the facade.
pub mod services;

/// Validated runtime settings for the ingest core.
pub mod settings;
