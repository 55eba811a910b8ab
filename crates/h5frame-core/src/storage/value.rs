//! Scalar values accepted by row buffers and array writers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One scalar cell as handed to the storage layer.
///
/// Values are deliberately wide; the row buffer narrows them to the column's
/// declared kind and rejects anything that does not fit.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed integer of any width.
    Int(i64),
    /// Unsigned integer of any width.
    UInt(u64),
    /// Floating point of any width.
    Float(f64),
    /// UTF-8 text.
    Str(String),
    /// Complex number.
    Complex {
        /// Real part.
        re: f64,
        /// Imaginary part.
        im: f64,
    },
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "bool {v}"),
            Value::Int(v) => write!(f, "int {v}"),
            Value::UInt(v) => write!(f, "uint {v}"),
            Value::Float(v) => write!(f, "float {v}"),
            Value::Str(v) => write!(f, "string {v:?}"),
            Value::Complex { re, im } => write!(f, "complex ({re}{im:+}j)"),
        }
    }
}

/// Metadata attribute attached to a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    /// Boolean attribute.
    Bool(bool),
    /// Integer attribute.
    Int(i64),
    /// Floating point attribute.
    Float(f64),
    /// Text attribute.
    Str(String),
}

impl AttrValue {
    /// Truthiness: `false`, zero and the empty string are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            AttrValue::Bool(b) => *b,
            AttrValue::Int(i) => *i != 0,
            AttrValue::Float(x) => *x != 0.0,
            AttrValue::Str(s) => !s.is_empty(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_value() {
        assert!(AttrValue::from("0.15.2").is_truthy());
        assert!(!AttrValue::from("").is_truthy());
        assert!(!AttrValue::Int(0).is_truthy());
        assert!(AttrValue::Int(-1).is_truthy());
        assert!(!AttrValue::Float(0.0).is_truthy());
        assert!(AttrValue::Float(f64::NAN).is_truthy());
        assert!(!AttrValue::Bool(false).is_truthy());
    }

    #[test]
    fn attr_json_is_tagged() {
        let json = serde_json::to_string(&AttrValue::from("frame")).unwrap();
        assert_eq!(json, r#"{"type":"str","value":"frame"}"#);
        let back: AttrValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AttrValue::from("frame"));
    }
}
