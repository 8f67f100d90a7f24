//! JSON-as-text column boundary
//!
//! Opaque structured values (page metadata, diagnostics, segment lists, graph
//! properties) live as typed values in memory and as JSON text in SQLite. Reads
//! never fail on malformed text: a bad column decodes to [`StoredJson::Absent`]
//! so one corrupt row cannot break listing or search of the others.

use crate::error::Result;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A JSON column after decoding
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StoredJson {
    /// Decoded value
    Value(Value),
    /// NULL, empty, JSON `null`, or text that failed to decode
    #[default]
    Absent,
}

impl StoredJson {
    /// Decode a column, mapping anything unusable to `Absent`
    pub fn decode(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Null) => Self::Absent,
                Ok(value) => Self::Value(value),
                Err(err) => {
                    tracing::debug!(error = %err, "Stored JSON column failed to decode");
                    Self::Absent
                }
            },
            None => Self::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Absent => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Absent => None,
        }
    }
}

impl From<Option<Value>> for StoredJson {
    fn from(value: Option<Value>) -> Self {
        match value {
            Some(Value::Null) | None => Self::Absent,
            Some(value) => Self::Value(value),
        }
    }
}

impl Serialize for StoredJson {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Value(value) => value.serialize(serializer),
            Self::Absent => serializer.serialize_none(),
        }
    }
}

/// Decode a JSON array column into typed items, empty on any failure
pub fn decode_list<T: DeserializeOwned>(raw: Option<&str>) -> Vec<T> {
    match StoredJson::decode(raw) {
        StoredJson::Value(value @ Value::Array(_)) => serde_json::from_value(value).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Decode a JSON array column element by element
///
/// Returns the items that decoded and how many elements were dropped.
pub fn decode_items<T: DeserializeOwned>(raw: Option<&str>) -> (Vec<T>, usize) {
    let StoredJson::Value(Value::Array(elements)) = StoredJson::decode(raw) else {
        return (Vec::new(), 0);
    };

    let mut skipped = 0;
    let items = elements
        .into_iter()
        .filter_map(|element| match serde_json::from_value(element) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::debug!(error = %err, "Dropping undecodable list element");
                skipped += 1;
                None
            }
        })
        .collect();
    (items, skipped)
}

/// Encode a value for a JSON text column; `None` and JSON `null` stay NULL
pub fn encode<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    match value {
        Some(value) => {
            let encoded = serde_json::to_value(value)?;
            if encoded.is_null() { Ok(None) } else { Ok(Some(serde_json::to_string(&encoded)?)) }
        }
        None => Ok(None),
    }
}
