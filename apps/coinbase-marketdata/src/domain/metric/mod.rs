//! Metric Types
//!
//! Consumer-facing output of the record parser: a named measurement with
//! string tags, typed fields and a timestamp. Tags and fields are kept in
//! key order so rendering is deterministic.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Floating point value.
    Float(f64),
    /// Signed integer value.
    Integer(i64),
    /// Boolean value.
    Bool(bool),
    /// String value.
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}i"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// A parsed metric ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Measurement name.
    pub name: String,
    /// Tag set.
    pub tags: BTreeMap<String, String>,
    /// Field set.
    pub fields: BTreeMap<String, FieldValue>,
    /// Measurement time.
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    /// Create a metric with no tags or fields.
    #[must_use]
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Get a tag value.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Get a field value.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Render as an Influx line protocol line (nanosecond precision).
    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_key(&self.name, false);

        for (key, value) in &self.tags {
            let _ = write!(line, ",{}={}", escape_key(key, true), escape_key(value, true));
        }

        let fields = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={value}", escape_key(key, true)))
            .collect::<Vec<_>>()
            .join(",");
        line.push(' ');
        line.push_str(&fields);

        if let Some(nanos) = self.timestamp.timestamp_nanos_opt() {
            let _ = write!(line, " {nanos}");
        }

        line
    }
}

fn escape_key(raw: &str, escape_equals: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == ',' || c == ' ' || (escape_equals && c == '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
