//! JSON Metric Parser
//!
//! Converts a normalized JSON record into [`Metric`]s, in the manner of a
//! Telegraf `json` input parser:
//!
//! - the measurement name is read from `name_key`
//! - the timestamp is read from `time_key` (RFC 3339); absent means now
//! - keys listed in `tag_keys` become tags
//! - numbers become float fields and booleans bool fields
//! - other strings are kept only if listed in `string_fields`
//! - nested objects and arrays are flattened with `_`
//!
//! A top-level array yields one metric per object element.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::application::ports::{ParseError, RecordParser};
use crate::domain::metric::{FieldValue, Metric};

/// Parser configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonParserConfig {
    /// Key holding the measurement name.
    pub name_key: String,
    /// Key holding the timestamp.
    pub time_key: String,
    /// Keys promoted to tags.
    pub tag_keys: Vec<String>,
    /// String keys kept as fields.
    pub string_fields: Vec<String>,
}

impl Default for JsonParserConfig {
    fn default() -> Self {
        Self {
            name_key: "type".to_string(),
            time_key: "time".to_string(),
            tag_keys: vec![
                "type".to_string(),
                "product_id".to_string(),
                "side".to_string(),
            ],
            string_fields: Vec::new(),
        }
    }
}

/// Telegraf-style JSON to metric parser.
#[derive(Debug, Clone, Default)]
pub struct JsonMetricParser {
    config: JsonParserConfig,
}

impl JsonMetricParser {
    /// Create a parser with the given configuration.
    #[must_use]
    pub const fn new(config: JsonParserConfig) -> Self {
        Self { config }
    }

    fn parse_object(&self, object: &Map<String, Value>) -> Result<Metric, ParseError> {
        let name = object
            .get(&self.config.name_key)
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::MissingName(self.config.name_key.clone()))?;

        let timestamp = match object.get(&self.config.time_key) {
            None | Some(Value::Null) => Utc::now(),
            Some(value) => self.parse_time(value)?,
        };

        let mut metric = Metric::new(name, timestamp);
        for (key, value) in object {
            if key == &self.config.time_key {
                continue;
            }
            if self.config.tag_keys.iter().any(|tag| tag == key) {
                let tag = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                metric.tags.insert(key.clone(), tag);
                continue;
            }
            self.flatten_into(&mut metric, key, value);
        }

        Ok(metric)
    }

    fn parse_time(&self, value: &Value) -> Result<DateTime<Utc>, ParseError> {
        let invalid = || ParseError::InvalidTimestamp {
            key: self.config.time_key.clone(),
            value: value.to_string(),
        };
        let text = value.as_str().ok_or_else(invalid)?;
        DateTime::parse_from_rfc3339(text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| invalid())
    }

    fn flatten_into(&self, metric: &mut Metric, key: &str, value: &Value) {
        match value {
            Value::Null => {}
            Value::Bool(b) => {
                metric.fields.insert(key.to_string(), FieldValue::Bool(*b));
            }
            Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    metric.fields.insert(key.to_string(), FieldValue::Float(f));
                }
            }
            Value::String(s) => {
                if self.config.string_fields.iter().any(|field| field == key) {
                    metric
                        .fields
                        .insert(key.to_string(), FieldValue::String(s.clone()));
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.flatten_into(metric, &format!("{key}_{index}"), item);
                }
            }
            Value::Object(object) => {
                for (child, item) in object {
                    self.flatten_into(metric, &format!("{key}_{child}"), item);
                }
            }
        }
    }
}

impl RecordParser for JsonMetricParser {
    fn parse(&self, payload: &[u8]) -> Result<Vec<Metric>, ParseError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        match value {
            Value::Object(object) => Ok(vec![self.parse_object(&object)?]),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(object) => self.parse_object(object),
                    _ => Err(ParseError::NotAnObject),
                })
                .collect(),
            _ => Err(ParseError::NotAnObject),
        }
    }
}
