//! Typed values fed into and produced by statistics operations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// No value
    Empty,
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Real,
    /// UTF-8 string
    String,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::String => "string",
        };
        f.write_str(s)
    }
}

/// Tagged value held by a record field or an accumulator
///
/// Serialized untagged, so record files read naturally as
/// `{"Name": "Peter", "Age": 53}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No value
    #[default]
    Empty,
    /// Integer value
    Integer(i64),
    /// Real value
    Real(f64),
    /// String value
    String(String),
}

impl Value {
    /// Tag of this value
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Empty => ValueKind::Empty,
            Self::Integer(_) => ValueKind::Integer,
            Self::Real(_) => ValueKind::Real,
            Self::String(_) => ValueKind::String,
        }
    }

    /// Check for the empty value
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Integer payload, if any
    #[inline]
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Real payload, if any
    #[inline]
    #[must_use]
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload, if any
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("<empty>"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Value::Empty.kind(), ValueKind::Empty);
        assert_eq!(Value::from(3).kind(), ValueKind::Integer);
        assert_eq!(Value::from(3.5).kind(), ValueKind::Real);
        assert_eq!(Value::from("x").kind(), ValueKind::String);
    }

    #[test]
    fn untagged_json() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, 53, 183.25, "John"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Empty,
                Value::Integer(53),
                Value::Real(183.25),
                Value::String("John".to_string())
            ]
        );
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from(7).as_integer(), Some(7));
        assert_eq!(Value::from(7).as_real(), None);
        assert_eq!(Value::from("a").as_str(), Some("a"));
        assert!(Value::default().is_empty());
    }
}
