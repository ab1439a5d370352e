//! Record Normalizer
//!
//! Pure conversion of loosely-typed feed events into [`Ticker`] and
//! [`L2Update`] records. No I/O and no shared state.
//!
//! Ticker normalization is lossy-tolerant per field: a missing or malformed
//! numeric field becomes zero without affecting its siblings. Level2
//! normalization is tolerant per row: a malformed change row is rejected on
//! its own and the remaining rows are still emitted.

pub mod envelope;
pub mod extract;

use serde_json::Value;

use crate::domain::records::{L2Update, Ticker};

pub use envelope::{DecodeError, EventKind, RawEvent, decode_frame};

/// A piece of an event could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// The `changes` entry is missing or not an array.
    #[error("l2update has no changes array")]
    MissingChanges,

    /// A change row is not a `[side, price, qty]` array.
    #[error("change row {index}: expected [side, price, qty], got {found}")]
    MalformedRow {
        /// Row position within `changes`.
        index: usize,
        /// Description of what was found instead.
        found: String,
    },

    /// A change row carries a non-numeric price or quantity.
    #[error("change row {index}: {field} is not numeric: {value}")]
    NonNumeric {
        /// Row position within `changes`.
        index: usize,
        /// "price" or "qty".
        field: &'static str,
        /// Raw value as text.
        value: String,
    },
}

/// Result of normalizing one level2 frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct L2UpdateBatch {
    /// One record per well-formed change row, in row order.
    pub updates: Vec<L2Update>,
    /// One error per rejected row.
    pub rejected: Vec<NormalizeError>,
}

/// Normalize a ticker event.
///
/// Never fails. The sequence number is read from the `sequence` key.
///
/// ```text
/// {"type":"ticker","sequence":12238444095,"product_id":"ETH-USD","price":"731.99",
///  "open_24h":"684.11","volume_24h":"395831.08785795","low_24h":"680.9","high_24h":"747",
///  "volume_30d":"6144317.83380943","best_bid":"731.83","best_ask":"731.99","side":"buy",
///  "time":"2020-12-28T23:54:32.051347Z","trade_id":71476932,"last_size":"0.24169456"}
/// ```
#[must_use]
pub fn normalize_ticker(event: &RawEvent) -> Ticker {
    let num = |key: &str| extract::decimal_or_zero(event.get(key));
    let int = |key: &str| extract::integer_or_zero(event.get(key));
    let txt = |key: &str| extract::text(event.get(key));

    Ticker {
        data_type: txt("type"),
        product_id: txt("product_id"),
        side: txt("side"),
        time: txt("time"),
        price: num("price"),
        open_24h: num("open_24h"),
        volume_24h: num("volume_24h"),
        low_24h: num("low_24h"),
        high_24h: num("high_24h"),
        volume_30d: num("volume_30d"),
        best_bid: num("best_bid"),
        best_ask: num("best_ask"),
        last_size: num("last_size"),
        sequence_id: int("sequence"),
        trade_id: int("trade_id"),
    }
}

/// Normalize a level2 update event into one record per change row.
///
/// ```text
/// {"type":"l2update","product_id":"ETH-USD","time":"2020-12-28T23:54:32.051347Z",
///  "changes":[["sell","731.99","1.24025886"]]}
/// ```
#[must_use]
pub fn normalize_l2update(event: &RawEvent) -> L2UpdateBatch {
    let Some(Value::Array(changes)) = event.get("changes") else {
        return L2UpdateBatch {
            updates: Vec::new(),
            rejected: vec![NormalizeError::MissingChanges],
        };
    };

    let data_type = extract::text(event.get("type"));
    let product_id = extract::text(event.get("product_id"));
    let time = extract::text(event.get("time"));

    let mut batch = L2UpdateBatch {
        updates: Vec::with_capacity(changes.len()),
        rejected: Vec::new(),
    };

    for (index, row) in changes.iter().enumerate() {
        match parse_change_row(index, row) {
            Ok((side, price, qty)) => batch.updates.push(L2Update {
                data_type: data_type.clone(),
                product_id: product_id.clone(),
                side,
                price,
                qty,
                time: time.clone(),
            }),
            Err(e) => batch.rejected.push(e),
        }
    }

    batch
}

fn parse_change_row(
    index: usize,
    row: &Value,
) -> Result<(String, rust_decimal::Decimal, rust_decimal::Decimal), NormalizeError> {
    let cells = match row {
        Value::Array(cells) if cells.len() == 3 => cells,
        Value::Array(cells) => {
            return Err(NormalizeError::MalformedRow {
                index,
                found: format!("{} elements", cells.len()),
            });
        }
        other => {
            return Err(NormalizeError::MalformedRow {
                index,
                found: other.to_string(),
            });
        }
    };

    let price = extract::decimal(cells.get(1)).ok_or_else(|| NormalizeError::NonNumeric {
        index,
        field: "price",
        value: extract::text(cells.get(1)),
    })?;
    let qty = extract::decimal(cells.get(2)).ok_or_else(|| NormalizeError::NonNumeric {
        index,
        field: "qty",
        value: extract::text(cells.get(2)),
    })?;

    Ok((extract::text(cells.first()), price, qty))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn event(value: Value) -> RawEvent {
        match value {
            Value::Object(map) => map,
            _ => panic!("test event must be an object"),
        }
    }

    fn full_ticker() -> RawEvent {
        event(json!({
            "type": "ticker",
            "sequence": 12_238_444_095_i64,
            "product_id": "ETH-USD",
            "price": "731.99",
            "open_24h": "684.11",
            "volume_24h": "395831.08785795",
            "low_24h": "680.9",
            "high_24h": "747",
            "volume_30d": "6144317.83380943",
            "best_bid": "731.83",
            "best_ask": "731.99",
            "side": "buy",
            "time": "2020-12-28T23:54:32.051347Z",
            "trade_id": 71_476_932,
            "last_size": "0.24169456"
        }))
    }

    #[test]
    fn ticker_all_fields() {
        let ticker = normalize_ticker(&full_ticker());

        assert_eq!(ticker.data_type, "ticker");
        assert_eq!(ticker.product_id, "ETH-USD");
        assert_eq!(ticker.side, "buy");
        assert_eq!(ticker.time, "2020-12-28T23:54:32.051347Z");
        assert_eq!(ticker.price, Decimal::new(73199, 2));
        assert_eq!(ticker.open_24h, Decimal::new(68411, 2));
        assert_eq!(ticker.volume_24h, Decimal::new(39_583_108_785_795, 8));
        assert_eq!(ticker.low_24h, Decimal::new(6809, 1));
        assert_eq!(ticker.high_24h, Decimal::new(747, 0));
        assert_eq!(ticker.volume_30d, Decimal::new(614_431_783_380_943, 8));
        assert_eq!(ticker.best_bid, Decimal::new(73183, 2));
        assert_eq!(ticker.best_ask, Decimal::new(73199, 2));
        assert_eq!(ticker.last_size, Decimal::new(24_169_456, 8));
        assert_eq!(ticker.sequence_id, 12_238_444_095);
        assert_eq!(ticker.trade_id, 71_476_932);
    }

    #[test]
    fn ticker_missing_open_24h_is_zero() {
        let mut raw = full_ticker();
        raw.remove("open_24h");

        let ticker = normalize_ticker(&raw);
        let reference = normalize_ticker(&full_ticker());

        assert_eq!(ticker.open_24h, Decimal::ZERO);
        assert_eq!(
            Ticker {
                open_24h: reference.open_24h,
                ..ticker
            },
            reference
        );
    }

    #[test]
    fn ticker_garbage_field_does_not_affect_siblings() {
        let mut raw = full_ticker();
        raw.insert("best_bid".to_string(), json!({"nested": true}));
        raw.insert("trade_id".to_string(), json!("not-a-number"));

        let ticker = normalize_ticker(&raw);
        assert_eq!(ticker.best_bid, Decimal::ZERO);
        assert_eq!(ticker.trade_id, 0);
        assert_eq!(ticker.best_ask, Decimal::new(73199, 2));
        assert_eq!(ticker.sequence_id, 12_238_444_095);
    }

    #[test]
    fn ticker_missing_strings_render_as_null() {
        let ticker = normalize_ticker(&event(json!({"type": "ticker"})));
        assert_eq!(ticker.product_id, "null");
        assert_eq!(ticker.side, "null");
        assert_eq!(ticker.price, Decimal::ZERO);
    }

    #[test]
    fn l2update_single_row() {
        let raw = event(json!({
            "type": "l2update",
            "product_id": "ETH-USD",
            "changes": [["sell", "731.99", "1.24025886"]],
            "time": "2020-12-28T23:54:32.051347Z"
        }));

        let batch = normalize_l2update(&raw);
        assert!(batch.rejected.is_empty());
        assert_eq!(batch.updates.len(), 1);

        let update = &batch.updates[0];
        assert_eq!(update.data_type, "l2update");
        assert_eq!(update.side, "sell");
        assert_eq!(update.price, Decimal::new(73199, 2));
        assert_eq!(update.qty, Decimal::new(124_025_886, 8));
        assert_eq!(update.product_id, "ETH-USD");
        assert_eq!(update.time, "2020-12-28T23:54:32.051347Z");
    }

    #[test]
    fn l2update_multiple_rows_preserve_order() {
        let raw = event(json!({
            "type": "l2update",
            "product_id": "BTC-USD",
            "changes": [
                ["buy", "100.00", "1"],
                ["sell", "101.50", "0.5"],
                ["buy", "99.75", "0"]
            ],
            "time": "2021-01-01T00:00:00.000000Z"
        }));

        let batch = normalize_l2update(&raw);
        assert_eq!(batch.updates.len(), 3);
        assert!(batch.rejected.is_empty());

        let sides: Vec<&str> = batch.updates.iter().map(|u| u.side.as_str()).collect();
        assert_eq!(sides, vec!["buy", "sell", "buy"]);
        assert_eq!(batch.updates[1].price, Decimal::new(10150, 2));
        assert_eq!(batch.updates[2].qty, Decimal::ZERO);
        assert!(batch.updates.iter().all(|u| u.product_id == "BTC-USD"));
        assert!(
            batch
                .updates
                .iter()
                .all(|u| u.time == "2021-01-01T00:00:00.000000Z")
        );
    }

    #[test]
    fn l2update_malformed_rows_are_isolated() {
        let raw = event(json!({
            "type": "l2update",
            "product_id": "ETH-USD",
            "changes": [
                ["buy", "1.0", "2.0"],
                ["sell", "oops", "1"],
                ["buy", "3.0"],
                "not-a-row",
                ["sell", "4.0", null],
                ["sell", "5.0", "6.0"]
            ],
            "time": "t"
        }));

        let batch = normalize_l2update(&raw);
        let prices: Vec<Decimal> = batch.updates.iter().map(|u| u.price).collect();
        assert_eq!(prices, vec![Decimal::new(1, 0), Decimal::new(5, 0)]);

        assert_eq!(
            batch.rejected,
            vec![
                NormalizeError::NonNumeric {
                    index: 1,
                    field: "price",
                    value: "oops".to_string(),
                },
                NormalizeError::MalformedRow {
                    index: 2,
                    found: "2 elements".to_string(),
                },
                NormalizeError::MalformedRow {
                    index: 3,
                    found: "\"not-a-row\"".to_string(),
                },
                NormalizeError::NonNumeric {
                    index: 4,
                    field: "qty",
                    value: "null".to_string(),
                },
            ]
        );
    }

    #[test]
    fn l2update_without_changes() {
        let batch = normalize_l2update(&event(json!({"type": "l2update"})));
        assert!(batch.updates.is_empty());
        assert_eq!(batch.rejected, vec![NormalizeError::MissingChanges]);

        let batch = normalize_l2update(&event(json!({"type": "l2update", "changes": {}})));
        assert_eq!(batch.rejected, vec![NormalizeError::MissingChanges]);
    }

    #[test]
    fn l2update_empty_changes() {
        let batch = normalize_l2update(&event(json!({"type": "l2update", "changes": []})));
        assert_eq!(batch, L2UpdateBatch::default());
    }

    proptest! {
        #[test]
        fn ticker_numeric_fields_round_trip(
            mantissa in -1_000_000_000_000_i64..1_000_000_000_000_i64,
            scale in 0_u32..10,
            trade_id in any::<i64>(),
        ) {
            let price = Decimal::new(mantissa, scale);
            let raw = event(json!({
                "type": "ticker",
                "product_id": "ETH-USD",
                "price": price.to_string(),
                "last_size": price.to_string(),
                "trade_id": trade_id,
            }));

            let ticker = normalize_ticker(&raw);
            prop_assert_eq!(ticker.price, price);
            prop_assert_eq!(ticker.last_size, price);
            prop_assert_eq!(ticker.trade_id, trade_id);
            prop_assert_eq!(ticker.product_id, "ETH-USD");
        }

        #[test]
        fn l2update_yields_one_record_per_row(rows in proptest::collection::vec(
            (prop_oneof!["buy", "sell"], 1_i64..10_000_000, 0_i64..10_000_000),
            0..20,
        )) {
            let changes: Vec<Value> = rows
                .iter()
                .map(|(side, p, q)| {
                    json!([side, Decimal::new(*p, 2).to_string(), Decimal::new(*q, 4).to_string()])
                })
                .collect();
            let raw = event(json!({
                "type": "l2update",
                "product_id": "ETH-USD",
                "time": "t",
                "changes": changes,
            }));

            let batch = normalize_l2update(&raw);
            prop_assert!(batch.rejected.is_empty());
            prop_assert_eq!(batch.updates.len(), rows.len());
            for (update, (side, p, q)) in batch.updates.iter().zip(&rows) {
                prop_assert_eq!(&update.side, side);
                prop_assert_eq!(update.price, Decimal::new(*p, 2));
                prop_assert_eq!(update.qty, Decimal::new(*q, 4));
            }
        }
    }
}
