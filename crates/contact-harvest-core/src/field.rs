//! Tolerant decoding of remote record fields.
//!
//! The remote directory returns the same logical field in several shapes:
//! a bare value (`"NickName": "Alice"`), a wrapped value
//! (`"NickName": {"string": "Alice"}`), or an empty-object marker
//! (`"NickName": {}`) meaning "no value". [`FlexibleField`] folds those into
//! one accessor, and [`Extractor`] tables declare which keys feed which
//! logical field, in priority order.

use serde_json::Value;

use crate::models::RawRecord;

/// Key used by the wrapped shape `{ "string": value }`.
pub const WRAPPER_KEY: &str = "string";

/// Literal some payloads use in place of an empty value.
const EMPTY_OBJECT_MARKER: &str = "{}";

/// One field value, after undoing the wrapper shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlexibleField<'a> {
    /// `"key": value`
    Bare(&'a Value),
    /// `"key": { "string": value }`
    Wrapped(&'a Value),
    /// Missing, `null`, `{}`, or an object without the wrapper key.
    Absent,
}

impl<'a> FlexibleField<'a> {
    pub fn decode(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => FlexibleField::Absent,
            Some(Value::Object(map)) => match map.get(WRAPPER_KEY) {
                Some(inner) if !inner.is_null() && !inner.is_object() => {
                    FlexibleField::Wrapped(inner)
                }
                _ => FlexibleField::Absent,
            },
            Some(other) => FlexibleField::Bare(other),
        }
    }

    pub fn lookup(record: &'a RawRecord, key: &str) -> Self {
        Self::decode(record.get(key))
    }

    pub fn value(&self) -> Option<&'a Value> {
        match *self {
            FlexibleField::Bare(v) | FlexibleField::Wrapped(v) => Some(v),
            FlexibleField::Absent => None,
        }
    }

    /// Scalar value as text. Blank strings and the `"{}"` marker count as
    /// absent; arrays and objects have no text form.
    pub fn text(&self) -> Option<String> {
        match self.value()? {
            Value::String(s) => {
                if s.trim().is_empty() || s.trim() == EMPTY_OBJECT_MARKER {
                    None
                } else {
                    Some(s.clone())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Integer value, accepting numeric strings.
    pub fn integer(&self) -> Option<i64> {
        match self.value()? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// How one logical field is read from a raw record.
#[derive(Debug, Clone, Copy)]
pub enum Extractor {
    /// A single key, bare or wrapped.
    Key(&'static str),
    /// Several keys whose present values are joined with a space.
    Joined(&'static [&'static str]),
}

impl Extractor {
    pub fn extract(&self, record: &RawRecord) -> Option<String> {
        match self {
            Extractor::Key(key) => FlexibleField::lookup(record, key).text(),
            Extractor::Joined(keys) => {
                let parts: Vec<String> = keys
                    .iter()
                    .filter_map(|key| FlexibleField::lookup(record, key).text())
                    .map(|s| s.trim().to_string())
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(" "))
                }
            }
        }
    }

    pub fn extract_integer(&self, record: &RawRecord) -> Option<i64> {
        match self {
            Extractor::Key(key) => FlexibleField::lookup(record, key).integer(),
            Extractor::Joined(_) => None,
        }
    }

    /// Raw keys this extractor reads.
    pub fn keys(&self) -> &[&'static str] {
        match self {
            Extractor::Key(key) => std::slice::from_ref(key),
            Extractor::Joined(keys) => *keys,
        }
    }
}

/// First extractor that yields a value wins.
pub fn first_text(record: &RawRecord, extractors: &[Extractor]) -> Option<String> {
    extractors.iter().find_map(|e| e.extract(record))
}

pub fn first_integer(record: &RawRecord, extractors: &[Extractor]) -> Option<i64> {
    extractors.iter().find_map(|e| e.extract_integer(record))
}
