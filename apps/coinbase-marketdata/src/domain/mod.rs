//! Domain Layer - Market data records and normalization.
//!
//! This layer contains the typed records, the pure normalizer that produces
//! them from loosely-typed feed events, and the metric type handed to the
//! downstream sink. Nothing here performs I/O.

/// Typed records (ticker, level2 update).
pub mod records;

/// Event decoding and record normalization.
pub mod normalizer;

/// Parsed metric representation.
pub mod metric;
