//! Typed attribute values of the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a local entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// Boolean.
    Boolean,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit floating point.
    Double,
    /// UTF-8 text.
    String,
    /// Point in time (UTC).
    Date,
    /// Opaque bytes.
    Binary,
}

impl AttributeType {
    /// Returns the lowercase name of the type.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            AttributeType::Boolean => "boolean",
            AttributeType::Integer => "integer",
            AttributeType::Double => "double",
            AttributeType::String => "string",
            AttributeType::Date => "date",
            AttributeType::Binary => "binary",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed attribute value.
///
/// `Null` is compatible with every [`AttributeType`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AttributeValue {
    /// No value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Double(f64),
    /// Text value.
    Text(String),
    /// Date value.
    Date(DateTime<Utc>),
    /// Binary value.
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Returns the type of this value, or `None` for `Null`.
    #[must_use]
    pub fn attribute_type(&self) -> Option<AttributeType> {
        match self {
            AttributeValue::Null => None,
            AttributeValue::Bool(_) => Some(AttributeType::Boolean),
            AttributeValue::Integer(_) => Some(AttributeType::Integer),
            AttributeValue::Double(_) => Some(AttributeType::Double),
            AttributeValue::Text(_) => Some(AttributeType::String),
            AttributeValue::Date(_) => Some(AttributeType::Date),
            AttributeValue::Binary(_) => Some(AttributeType::Binary),
        }
    }

    /// Returns true if this value may be stored in an attribute of `ty`.
    #[must_use]
    pub fn conforms_to(&self, ty: AttributeType) -> bool {
        self.attribute_type().map_or(true, |own| own == ty)
    }

    /// Returns true if this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Returns the boolean value, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the text value, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Integer(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Integer(i64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(v: DateTime<Utc>) -> Self {
        AttributeValue::Date(v)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(v: Vec<u8>) -> Self {
        AttributeValue::Binary(v)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(AttributeValue::Null, Into::into)
    }
}
