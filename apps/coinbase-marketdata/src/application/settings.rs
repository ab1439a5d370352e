//! Runtime settings consumed by the ingest core.
//!
//! These are already-validated values; loading them from the environment
//! lives in `infrastructure::config`.

use std::time::Duration;

/// Connection endpoint and subscription payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Websocket URI to dial.
    pub service_address: String,
    /// Text frame sent verbatim right after connecting.
    pub on_connect_message: String,
}

impl IngestSettings {
    /// Create settings.
    #[must_use]
    pub fn new(service_address: impl Into<String>, on_connect_message: impl Into<String>) -> Self {
        Self {
            service_address: service_address.into(),
            on_connect_message: on_connect_message.into(),
        }
    }
}

/// What the read path does when every dispatch slot is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for a free slot before reading the next frame.
    #[default]
    Block,
    /// Discard the frame and count it.
    DropNewest,
}

impl OverflowPolicy {
    /// Parse from a config string; unknown values fall back to `Block`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "drop" | "drop_newest" | "drop-newest" => Self::DropNewest,
            _ => Self::Block,
        }
    }

    /// Config name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::DropNewest => "drop",
        }
    }
}

/// Dispatch loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Maximum frames processed concurrently.
    pub max_in_flight: usize,
    /// Behaviour when `max_in_flight` is reached.
    pub overflow: OverflowPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 256,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Options for the ingest facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Dispatch loop tuning.
    pub dispatch: DispatchSettings,
    /// Upper bound on the connect handshake.
    pub connect_timeout: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            dispatch: DispatchSettings::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
