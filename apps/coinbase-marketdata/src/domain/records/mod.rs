//! Typed Market Data Records
//!
//! Strictly-typed outputs of normalization. These are the only shapes that
//! leave the normalizer; everything downstream (the metric parser, the sink)
//! sees one of these serialized to JSON.
//!
//! # Wire Format (JSON, after normalization)
//!
//! ```json
//! {"type":"ticker","product_id":"ETH-USD","side":"buy","time":"2020-12-28T23:54:32.051347Z",
//!  "price":731.99,"open_24h":684.11,...,"sequence_id":12238444095,"trade_id":71476932}
//! {"type":"l2update","product_id":"ETH-USD","side":"sell","price":731.99,"qty":1.24025886,
//!  "time":"2020-12-28T23:54:32.051347Z"}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Discriminator value for ticker records.
pub const TICKER_TYPE: &str = "ticker";

/// Discriminator value for level2 update records.
pub const L2_UPDATE_TYPE: &str = "l2update";

// =============================================================================
// Ticker
// =============================================================================

/// Ticker snapshot for one product.
///
/// Every numeric field is independently zero when the source value was
/// missing or unparsable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Record discriminator (always "ticker" for well-formed input).
    #[serde(rename = "type")]
    pub data_type: String,

    /// Product identifier (e.g., "ETH-USD").
    pub product_id: String,

    /// Taker side of the last trade.
    pub side: String,

    /// Event time, ISO-8601.
    pub time: String,

    /// Last trade price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,

    /// Price 24 hours ago.
    #[serde(with = "rust_decimal::serde::float")]
    pub open_24h: Decimal,

    /// Volume over the last 24 hours.
    #[serde(with = "rust_decimal::serde::float")]
    pub volume_24h: Decimal,

    /// Lowest price over the last 24 hours.
    #[serde(with = "rust_decimal::serde::float")]
    pub low_24h: Decimal,

    /// Highest price over the last 24 hours.
    #[serde(with = "rust_decimal::serde::float")]
    pub high_24h: Decimal,

    /// Volume over the last 30 days.
    #[serde(with = "rust_decimal::serde::float")]
    pub volume_30d: Decimal,

    /// Best bid price.
    #[serde(with = "rust_decimal::serde::float")]
    pub best_bid: Decimal,

    /// Best ask price.
    #[serde(with = "rust_decimal::serde::float")]
    pub best_ask: Decimal,

    /// Size of the last trade.
    #[serde(with = "rust_decimal::serde::float")]
    pub last_size: Decimal,

    /// Feed sequence number.
    pub sequence_id: i64,

    /// Last trade id.
    pub trade_id: i64,
}

// =============================================================================
// L2Update
// =============================================================================

/// One changed price level from a level2 update frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Update {
    /// Record discriminator (always "l2update" for well-formed input).
    #[serde(rename = "type")]
    pub data_type: String,

    /// Product identifier.
    pub product_id: String,

    /// Book side: "buy" or "sell".
    pub side: String,

    /// Price level.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,

    /// New aggregate size at the level (zero removes the level).
    #[serde(with = "rust_decimal::serde::float")]
    pub qty: Decimal,

    /// Event time, ISO-8601.
    pub time: String,
}

// =============================================================================
// Typed Record
// =============================================================================

/// Any record produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedRecord {
    /// Ticker snapshot.
    Ticker(Ticker),
    /// Level2 change row.
    L2Update(L2Update),
}

impl TypedRecord {
    /// Record type label, used for logging and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ticker(_) => TICKER_TYPE,
            Self::L2Update(_) => L2_UPDATE_TYPE,
        }
    }

    /// Serialize to the transport-neutral JSON payload handed to the parser.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Ticker(ticker) => serde_json::to_vec(ticker),
            Self::L2Update(update) => serde_json::to_vec(update),
        }
    }
}

impl From<Ticker> for TypedRecord {
    fn from(ticker: Ticker) -> Self {
        Self::Ticker(ticker)
    }
}

impl From<L2Update> for TypedRecord {
    fn from(update: L2Update) -> Self {
        Self::L2Update(update)
    }
}
