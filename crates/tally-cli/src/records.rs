//! Record files
//!
//! A record file is JSON holding the schemas of an in-memory store and the
//! records to feed into it:
//!
//! ```json
//! {
//!   "schemas": [
//!     { "name": "PersonSchema",
//!       "record_types": [
//!         { "name": "Person",
//!           "fields": [ { "name": "Age", "kind": "Integer" } ] } ] }
//!   ],
//!   "records": [
//!     { "schema": "PersonSchema", "record_type": "Person", "values": { "Age": 53 } }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tally_core::{FieldDesc, InMemoryStore, RecordTypeDesc, Schema, Value, ValueKind};

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordTypeSpec {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaSpec {
    pub name: String,
    #[serde(default)]
    pub record_types: Vec<RecordTypeSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordSpec {
    pub schema: String,
    pub record_type: String,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

/// Parsed record file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordsFile {
    #[serde(default)]
    pub schemas: Vec<SchemaSpec>,
    #[serde(default)]
    pub records: Vec<RecordSpec>,
}

impl RecordsFile {
    /// Read and parse a record file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read records from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse records in {}", path.display()))
    }

    /// Empty store with every schema of this file registered
    pub fn build_store(&self) -> Result<Arc<InMemoryStore>> {
        let store = InMemoryStore::new();
        for spec in &self.schemas {
            let mut schema = Schema::new(spec.name.clone());
            for record_type in &spec.record_types {
                let fields = record_type
                    .fields
                    .iter()
                    .map(|f| FieldDesc::new(f.name.clone(), f.kind))
                    .collect();
                schema.add(RecordTypeDesc::new(record_type.name.clone(), fields))?;
            }
            store.add_schema(schema)?;
        }
        Ok(store)
    }

    /// Add every record to `store`, in file order
    pub fn feed(&self, store: &InMemoryStore) -> Result<usize> {
        for (i, record) in self.records.iter().enumerate() {
            store
                .add(
                    &record.schema,
                    &record.record_type,
                    record.values.iter().map(|(k, v)| (k.as_str(), v.clone())),
                )
                .with_context(|| format!("record #{i} rejected"))?;
        }
        Ok(self.records.len())
    }
}
