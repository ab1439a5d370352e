//! Coinbase subscribe request.
//!
//! The feed expects a single text frame right after the handshake:
//!
//! ```json
//! {"type":"subscribe","product_ids":["ETH-USD"],"channels":["level2","heartbeat","ticker"]}
//! ```

use serde::{Deserialize, Serialize};

/// Subscribe request frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Always `"subscribe"`.
    #[serde(rename = "type")]
    pub request_type: String,

    /// Products to subscribe to, e.g. `ETH-USD`.
    pub product_ids: Vec<String>,

    /// Channels to subscribe to, e.g. `ticker`, `level2`.
    pub channels: Vec<String>,
}

impl SubscribeRequest {
    /// Create a subscribe request.
    #[must_use]
    pub fn new(product_ids: Vec<String>, channels: Vec<String>) -> Self {
        Self {
            request_type: "subscribe".to_string(),
            product_ids,
            channels,
        }
    }

    /// Serialize to the text frame sent on connect.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Default for SubscribeRequest {
    fn default() -> Self {
        Self::new(
            vec!["ETH-USD".to_string()],
            vec![
                "level2".to_string(),
                "heartbeat".to_string(),
                "ticker".to_string(),
            ],
        )
    }
}
