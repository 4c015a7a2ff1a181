//! Row decoder.
//!
//! Turns a [`RawRow`] into event fields. Each column is coerced on its own;
//! a column that cannot be decoded is reported and left out, the rest of the
//! row still goes through.

use std::collections::BTreeMap;

use crate::event::{FieldValue, RawRow, RawValue, TIMESTAMP_FIELD, TYPE_FIELD};

/// A column that was left out of the decoded row.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeIssue {
    /// Column name as reported by the driver.
    pub column: String,
    /// Observed runtime representation.
    pub representation: String,
}

/// Result of decoding one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRow {
    /// Decoded fields keyed by lower-cased column name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Columns that were dropped with a diagnostic.
    pub issues: Vec<DecodeIssue>,
}

/// Decodes every column of a row.
pub fn decode_row(row: &RawRow) -> DecodedRow {
    let mut decoded = DecodedRow::default();

    for (column, raw) in row.iter() {
        let key = column.to_ascii_lowercase();
        if key == TIMESTAMP_FIELD || key == TYPE_FIELD {
            decoded.issues.push(DecodeIssue {
                column: column.to_string(),
                representation: "reserved field name".to_string(),
            });
            continue;
        }

        match decode_value(raw) {
            Ok(Some(value)) => {
                decoded.fields.insert(key, value);
            }
            Ok(None) => {}
            Err(representation) => decoded.issues.push(DecodeIssue {
                column: column.to_string(),
                representation,
            }),
        }
    }

    decoded
}

/// Decodes a single value.
///
/// `Ok(None)` means the column carries no value and is omitted silently.
/// `Err` carries the representation that has no mapping.
pub fn decode_value(raw: &RawValue) -> Result<Option<FieldValue>, String> {
    match raw {
        RawValue::Null => Ok(None),
        RawValue::Text(text) => Ok(Some(coerce_text(text))),
        RawValue::Int(i) => Ok(Some(FieldValue::Int(*i))),
        RawValue::Float(f) => Ok(Some(FieldValue::Float(*f))),
        RawValue::Bytes(bytes) => Ok(Some(FieldValue::Text(
            String::from_utf8_lossy(bytes).into_owned(),
        ))),
        RawValue::Timestamp(ts) => Ok(Some(FieldValue::Timestamp(*ts))),
        RawValue::Unsupported(type_name) => Err(type_name.clone()),
    }
}

/// Recovers the numeric type of decimal-formatted text.
///
/// Integer parse wins over float parse. Non-finite floats stay text since
/// they have no JSON representation.
pub fn coerce_text(text: &str) -> FieldValue {
    if let Ok(i) = text.parse::<i64>() {
        return FieldValue::Int(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => FieldValue::Float(f),
        _ => FieldValue::Text(text.to_string()),
    }
}
