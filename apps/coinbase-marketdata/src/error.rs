//! Ingest error taxonomy.
//!
//! `Connect` and `Subscribe` are fatal and returned from
//! [`MarketDataIngest::start`](crate::MarketDataIngest::start). Everything
//! else is reported through [`RecordSink::add_error`](crate::RecordSink::add_error)
//! and never stops the dispatch loop, except `Read`, which ends the read path.

use crate::application::ports::{ParseError, TransportError};
use crate::domain::normalizer::{DecodeError, NormalizeError};

/// Errors produced by the ingest core.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Transport could not be established.
    #[error("connect to {address} failed: {source}")]
    Connect {
        /// Service address that was dialed.
        address: String,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },

    /// The subscription message could not be written.
    #[error("subscribe failed: {0}")]
    Subscribe(#[source] TransportError),

    /// Reading from the transport failed after subscription.
    #[error("read failed: {0}")]
    Read(#[source] TransportError),

    /// Inbound frame is not a valid event envelope.
    #[error("unable to decode incoming frame: {0}")]
    Decode(#[from] DecodeError),

    /// Part of an event could not be normalized.
    #[error("unable to normalize event: {0}")]
    Normalize(#[from] NormalizeError),

    /// A normalized record was rejected on its way to the sink.
    #[error("unable to forward record: {0}")]
    Forward(#[from] ParseError),
}

impl IngestError {
    /// Whether this error aborts `start`.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Subscribe(_))
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Subscribe(_) => "subscribe",
            Self::Read(_) => "read",
            Self::Decode(_) => "decode",
            Self::Normalize(_) => "normalize",
            Self::Forward(_) => "forward",
        }
    }
}
