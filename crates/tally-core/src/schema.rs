//! Record-store schema boundary
//!
//! Descriptor types a record store exposes to the statistics engine: schemas
//! group record types, record types name their fields. The [`Record`] trait is
//! the only view the engine has of an individual record.

use crate::error::{Result, StatError};
use crate::value::{Value, ValueKind};
use std::fmt;
use std::sync::Arc;

/// Named, typed field of a record type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDesc {
    name: String,
    kind: ValueKind,
}

impl FieldDesc {
    /// Create field descriptor
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Field name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared value tag
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

/// Descriptor of one record type inside a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTypeDesc {
    schema_name: String,
    name: String,
    fields: Vec<FieldDesc>,
}

impl RecordTypeDesc {
    /// Create record type descriptor; the schema name is set when it is added
    /// to a [`Schema`]
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<FieldDesc>) -> Self {
        Self {
            schema_name: String::new(),
            name: name.into(),
            fields,
        }
    }

    /// Name of the owning schema
    #[inline]
    #[must_use]
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Record type name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All field descriptors
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    /// Find field descriptor by name
    #[must_use]
    pub fn field_desc(&self, name: &str) -> Option<&FieldDesc> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check whether two descriptors denote the same record type
    #[inline]
    #[must_use]
    pub fn same_type(&self, other: &RecordTypeDesc) -> bool {
        self.schema_name == other.schema_name && self.name == other.name
    }
}

/// Named group of record types
#[derive(Debug, Clone, Default)]
pub struct Schema {
    name: String,
    record_types: Vec<Arc<RecordTypeDesc>>,
}

impl Schema {
    /// Create empty schema
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            record_types: Vec::new(),
        }
    }

    /// Schema name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add record type
    ///
    /// # Errors
    /// [`StatError::InvalidArgument`] if a record type with the same name exists
    pub fn add(&mut self, mut record_type: RecordTypeDesc) -> Result<Arc<RecordTypeDesc>> {
        if self.find_record_type(&record_type.name).is_some() {
            return Err(StatError::InvalidArgument(format!(
                "record type '{}' already defined in schema '{}'",
                record_type.name, self.name
            )));
        }
        record_type.schema_name.clone_from(&self.name);
        let record_type = Arc::new(record_type);
        self.record_types.push(Arc::clone(&record_type));
        Ok(record_type)
    }

    /// Find record type by name
    #[must_use]
    pub fn find_record_type(&self, name: &str) -> Option<Arc<RecordTypeDesc>> {
        self.record_types.iter().find(|d| d.name == name).cloned()
    }

    /// All record types
    #[inline]
    #[must_use]
    pub fn record_types(&self) -> &[Arc<RecordTypeDesc>] {
        &self.record_types
    }
}

/// One structured item of a record store
pub trait Record: Send + Sync + fmt::Debug {
    /// Descriptor of this record's type
    fn record_type(&self) -> &RecordTypeDesc;

    /// Value of a field, if the record carries it
    fn value(&self, field_name: &str) -> Option<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_sets_owner_name() {
        let mut schema = Schema::new("PersonSchema");
        let desc = schema
            .add(RecordTypeDesc::new(
                "Person",
                vec![FieldDesc::new("Age", ValueKind::Integer)],
            ))
            .unwrap();
        assert_eq!(desc.schema_name(), "PersonSchema");
        assert_eq!(desc.field_desc("Age").unwrap().kind(), ValueKind::Integer);
        assert!(desc.field_desc("Height").is_none());
    }

    #[test]
    fn schema_rejects_duplicate_record_type() {
        let mut schema = Schema::new("S");
        schema.add(RecordTypeDesc::new("T", vec![])).unwrap();
        assert!(schema.add(RecordTypeDesc::new("T", vec![])).is_err());
    }

    #[test]
    fn same_type_compares_schema_and_name() {
        let mut a = Schema::new("A");
        let mut b = Schema::new("B");
        let ta = a.add(RecordTypeDesc::new("T", vec![])).unwrap();
        let tb = b.add(RecordTypeDesc::new("T", vec![])).unwrap();
        assert!(ta.same_type(&ta));
        assert!(!ta.same_type(&tb));
    }
}
