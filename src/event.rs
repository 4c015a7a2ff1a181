//! Row and event data model.
//!
//! A [`RawRow`] is what a driver hands back for one result row: column names
//! paired with values whose runtime representation is only known at runtime.
//! An [`Event`] is the decoded, sink-ready form of that row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Name of the mandatory capture time field.
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Name of the mandatory metric name field.
pub const TYPE_FIELD: &str = "type";

/// A scalar value as returned by a database driver.
///
/// The representation of a given column is not fixed: some drivers return
/// numeric columns as decimal text, and the same column may arrive as a
/// different variant from one row to the next.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// SQL NULL or an unbound position.
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    /// A representation the collector has no mapping for.
    /// Carries the driver's name for the type.
    Unsupported(String),
}

/// One result row: column names paired positionally with raw values.
///
/// Column lookup is case-insensitive; source systems often report column
/// names upper-case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    columns: Vec<(String, RawValue)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds values to column names by position.
    ///
    /// Columns without a corresponding value are bound as [`RawValue::Null`];
    /// surplus values are dropped.
    pub fn bind(columns: &[String], values: Vec<RawValue>) -> Self {
        let mut values = values.into_iter();
        let columns = columns
            .iter()
            .map(|name| (name.clone(), values.next().unwrap_or(RawValue::Null)))
            .collect();
        Self { columns }
    }

    /// Appends a column.
    pub fn push(&mut self, name: impl Into<String>, value: RawValue) {
        self.columns.push((name.into(), value));
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, name: impl Into<String>, value: RawValue) -> Self {
        self.push(name, value);
        self
    }

    /// Returns the value of a column, ignoring case.
    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A resolved scalar carried by an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::Float(f) => serializer.serialize_f64(*f),
            FieldValue::Timestamp(ts) => ts.serialize(serializer),
        }
    }
}

/// Decoded record for one result row of one metric.
///
/// Serializes as a flat object holding every field plus `timestamp`
/// and `type`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    timestamp: DateTime<Utc>,
    metric: String,
    fields: BTreeMap<String, FieldValue>,
}

impl Event {
    /// Creates an event from decoded fields.
    ///
    /// Mandatory field names are never taken from `fields`; the decoder
    /// already drops columns that would collide with them.
    pub fn new(
        metric: impl Into<String>,
        timestamp: DateTime<Utc>,
        mut fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        fields.remove(TIMESTAMP_FIELD);
        fields.remove(TYPE_FIELD);
        Self {
            timestamp,
            metric: metric.into(),
            fields,
        }
    }

    /// Capture time of the row.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Name of the metric that produced this event (the `type` field).
    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Number of fields including the two mandatory ones.
    pub fn len(&self) -> usize {
        self.fields.len() + 2
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Renders the event as a single JSON line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        map.serialize_entry(TIMESTAMP_FIELD, &self.timestamp)?;
        map.serialize_entry(TYPE_FIELD, &self.metric)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
