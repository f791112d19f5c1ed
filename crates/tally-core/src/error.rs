//! Error types for tally statistics
//!
//! Provides the single [`StatError`] taxonomy used by operations, the
//! operation registry, stat fields, stats and the configuration layer.

use crate::value::ValueKind;

/// Result alias used throughout the crate
pub type Result<T, E = StatError> = std::result::Result<T, E>;

/// Statistics error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatError {
    /// Bad configuration: unknown schema/record type/field, duplicate names,
    /// constructors that produce nothing
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown operation or stat field name
    #[error("not found: {0}")]
    NotFound(String),

    /// Value tag conflicts with the tag held by the accumulator
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Tag already held by the accumulator
        expected: ValueKind,
        /// Tag of the offending value
        found: ValueKind,
    },

    /// Operation/action combination has no incremental implementation
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Registry or engine invariant violated
    #[error("internal error: {0}")]
    Internal(String),

    /// Error raised while working on a specific stat field
    #[error("stat '{stat}', field '{field}': {source}")]
    Field {
        /// Stat name
        stat: String,
        /// Stat field name
        field: String,
        /// Underlying error
        #[source]
        source: Box<StatError>,
    },

    /// Configuration could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StatError {
    /// Create not-supported error for a value outside an operation's domain
    #[inline]
    #[must_use]
    pub fn unsupported_kind(op: &str, kind: ValueKind) -> Self {
        Self::NotSupported(format!("operation '{op}' is not applicable to {kind} values"))
    }

    /// Create not-supported error for removal from an empty accumulator
    #[inline]
    #[must_use]
    pub fn remove_from_empty(op: &str) -> Self {
        Self::NotSupported(format!("cannot remove from empty accumulator of '{op}'"))
    }

    /// Attach stat and field names to this error
    #[must_use]
    pub fn in_field(self, stat: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Field {
            stat: stat.into(),
            field: field.into(),
            source: Box::new(self),
        }
    }

    /// Errors that an incremental path downgrades to "needs rescan"
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TypeMismatch { .. } | Self::NotSupported(_) => true,
            Self::Field { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Innermost error, skipping field context wrappers
    #[must_use]
    pub fn root(&self) -> &StatError {
        match self {
            Self::Field { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for StatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for StatError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_context_names_stat_and_field() {
        let err = StatError::NotSupported("x".to_string()).in_field("People", "AgeMin");
        let msg = err.to_string();
        assert!(msg.contains("People"));
        assert!(msg.contains("AgeMin"));
    }

    #[test]
    fn recoverable_classification() {
        assert!(StatError::NotSupported(String::new()).is_recoverable());
        assert!(StatError::TypeMismatch {
            expected: ValueKind::Integer,
            found: ValueKind::Real
        }
        .is_recoverable());
        assert!(!StatError::NotFound(String::new()).is_recoverable());
        assert!(StatError::remove_from_empty("sum").in_field("s", "f").is_recoverable());
    }

    #[test]
    fn root_unwraps_context() {
        let err = StatError::Internal("boom".to_string()).in_field("s", "f");
        assert!(matches!(err.root(), StatError::Internal(_)));
    }
}
