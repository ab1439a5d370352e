//! Ingest Configuration Settings
//!
//! Configuration types for the ingest service, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::settings::{
    DispatchSettings, IngestOptions, IngestSettings, OverflowPolicy,
};
use crate::infrastructure::coinbase::SubscribeRequest;
use crate::infrastructure::sink::DEFAULT_SINK_CAPACITY;

/// Default Coinbase feed endpoint.
pub const DEFAULT_SERVICE_ADDRESS: &str = "wss://ws-feed.pro.coinbase.com";

/// Feed endpoint and subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Websocket URI.
    pub service_address: String,
    /// Text frame sent on connect.
    pub on_connect_message: String,
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete ingest configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Feed settings.
    pub feed: FeedSettings,
    /// Dispatch loop tuning.
    pub dispatch: DispatchSettings,
    /// Connect handshake timeout.
    pub connect_timeout: Duration,
    /// Downstream sink channel capacity.
    pub sink_capacity: usize,
    /// Server port settings.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_address = lookup("COINBASE_SERVICE_ADDRESS")
            .unwrap_or_else(|| DEFAULT_SERVICE_ADDRESS.to_string());
        if service_address.trim().is_empty() {
            return Err(ConfigError::EmptyValue(
                "COINBASE_SERVICE_ADDRESS".to_string(),
            ));
        }
        if !(service_address.starts_with("ws://") || service_address.starts_with("wss://")) {
            return Err(ConfigError::InvalidAddress(service_address));
        }

        let on_connect_message = match lookup("COINBASE_ON_CONNECT_MSG") {
            Some(message) => message,
            None => default_subscription(&lookup)?,
        };
        if on_connect_message.trim().is_empty() {
            return Err(ConfigError::EmptyValue(
                "COINBASE_ON_CONNECT_MSG".to_string(),
            ));
        }

        let dispatch = DispatchSettings {
            max_in_flight: parse_or(
                &lookup,
                "INGEST_MAX_IN_FLIGHT",
                DispatchSettings::default().max_in_flight,
            ),
            overflow: lookup("INGEST_OVERFLOW_POLICY")
                .map(|s| OverflowPolicy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
        };
        if dispatch.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INGEST_MAX_IN_FLIGHT".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let connect_timeout = Duration::from_secs(parse_or(
            &lookup,
            "INGEST_CONNECT_TIMEOUT_SECS",
            IngestOptions::default().connect_timeout.as_secs(),
        ));

        Ok(Self {
            feed: FeedSettings {
                service_address,
                on_connect_message,
            },
            dispatch,
            connect_timeout,
            sink_capacity: parse_or(&lookup, "INGEST_SINK_CAPACITY", DEFAULT_SINK_CAPACITY),
            server: ServerSettings {
                health_port: parse_or(
                    &lookup,
                    "INGEST_HEALTH_PORT",
                    ServerSettings::default().health_port,
                ),
            },
        })
    }

    /// Settings for [`MarketDataIngest::start`](crate::MarketDataIngest::start).
    #[must_use]
    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings::new(
            self.feed.service_address.clone(),
            self.feed.on_connect_message.clone(),
        )
    }

    /// Options for [`MarketDataIngest::with_options`](crate::MarketDataIngest::with_options).
    #[must_use]
    pub const fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            dispatch: self.dispatch,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Service address is not a websocket URI.
    #[error("service address must start with ws:// or wss://, got {0}")]
    InvalidAddress(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn default_subscription<F>(lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = SubscribeRequest::default();
    let product_ids = lookup("COINBASE_PRODUCT_IDS").map_or(defaults.product_ids, |v| split_list(&v));
    let channels = lookup("COINBASE_CHANNELS").map_or(defaults.channels, |v| split_list(&v));

    if product_ids.is_empty() {
        return Err(ConfigError::EmptyValue("COINBASE_PRODUCT_IDS".to_string()));
    }
    if channels.is_empty() {
        return Err(ConfigError::EmptyValue("COINBASE_CHANNELS".to_string()));
    }

    SubscribeRequest::new(product_ids, channels)
        .to_message()
        .map_err(|e| ConfigError::InvalidValue {
            key: "COINBASE_ON_CONNECT_MSG".to_string(),
            reason: e.to_string(),
        })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
