//! Record store boundary and in-memory reference store
//!
//! [`RecordStore`] is what stats consume from their host. [`InMemoryStore`] is
//! a small host that keeps records in memory, owns a set of stats and forwards
//! every add/remove to them.
//!
//! # Store contract
//!
//! A stat calls [`RecordStore::all_records`] while holding its own lock, from
//! the caller's thread or from its update worker. A store must therefore:
//!
//! - never hold a lock that `all_records` needs while it calls
//!   [`Stat::notify`];
//! - announce an addition before the record becomes visible through
//!   `all_records`, and a removal after the record is gone;
//! - pass `notify` the same allocation that `all_records` returns;
//! - serialize its own mutations together with their notifications.
//!
//! Under these rules a rescan racing with an addition either sees the record
//! and drops the queued copy, or misses it and applies it incrementally.
//! `InMemoryStore` follows all of them.

use crate::error::{Result, StatError};
use crate::operation::StatAction;
use crate::schema::{Record, RecordTypeDesc, Schema};
use crate::stat::Stat;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Host of records and schemas, as seen by stats
pub trait RecordStore: Send + Sync {
    /// Find schema by name
    fn find_schema(&self, name: &str) -> Option<Arc<Schema>>;

    /// Snapshot of every record currently in the store
    fn all_records(&self) -> Vec<Arc<dyn Record>>;
}

/// Identifier of a record inside an [`InMemoryStore`]
pub type RecordId = u64;

/// Record held by an [`InMemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    id: RecordId,
    record_type: Arc<RecordTypeDesc>,
    values: BTreeMap<String, Value>,
}

impl MemoryRecord {
    /// Record identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// All field values
    #[inline]
    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

impl Record for MemoryRecord {
    fn record_type(&self) -> &RecordTypeDesc {
        &self.record_type
    }

    fn value(&self, field_name: &str) -> Option<Value> {
        self.values.get(field_name).cloned()
    }
}

/// In-memory record store with attached stats
#[derive(Debug, Default)]
pub struct InMemoryStore {
    schemas: RwLock<BTreeMap<String, Arc<Schema>>>,
    records: RwLock<Vec<Arc<MemoryRecord>>>,
    stats: RwLock<Vec<Arc<Stat>>>,
    next_id: AtomicU64,
    // held across a mutation and its notifications
    writer: Mutex<()>,
}

impl InMemoryStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a schema
    ///
    /// # Errors
    /// [`StatError::InvalidArgument`] if a schema with the same name exists
    pub fn add_schema(&self, schema: Schema) -> Result<()> {
        let mut schemas = self.schemas.write();
        if schemas.contains_key(schema.name()) {
            return Err(StatError::InvalidArgument(format!(
                "schema '{}' already registered",
                schema.name()
            )));
        }
        schemas.insert(schema.name().to_string(), Arc::new(schema));
        Ok(())
    }

    /// Attach a stat to this store and take ownership of it
    ///
    /// # Errors
    /// - [`StatError::InvalidArgument`] if a stat with the same name exists
    /// - attachment errors for unresolvable fields
    pub fn add_stat(self: &Arc<Self>, stat: Stat) -> Result<Arc<Stat>> {
        if self.stat(stat.name()).is_some() {
            return Err(StatError::InvalidArgument(format!(
                "stat '{}' already registered",
                stat.name()
            )));
        }
        let _writer = self.writer.lock();
        let store: Arc<dyn RecordStore> = Arc::clone(self) as Arc<dyn RecordStore>;
        stat.attach(&store)?;

        let stat = Arc::new(stat);
        self.stats.write().push(Arc::clone(&stat));
        Ok(stat)
    }

    /// Detach and drop a stat
    ///
    /// # Errors
    /// [`StatError::NotFound`] if no stat has this name
    pub fn remove_stat(&self, name: &str) -> Result<Arc<Stat>> {
        let stat = {
            let mut stats = self.stats.write();
            let pos = stats
                .iter()
                .position(|s| s.name() == name)
                .ok_or_else(|| StatError::NotFound(format!("stat not found: '{name}'")))?;
            stats.remove(pos)
        };
        stat.detach();
        Ok(stat)
    }

    /// Find stat by name
    #[must_use]
    pub fn stat(&self, name: &str) -> Option<Arc<Stat>> {
        self.stats.read().iter().find(|s| s.name() == name).cloned()
    }

    /// All attached stats
    #[must_use]
    pub fn stats(&self) -> Vec<Arc<Stat>> {
        self.stats.read().clone()
    }

    /// Add a record and notify attached stats
    ///
    /// # Errors
    /// [`StatError::InvalidArgument`] for an unknown schema, record type or
    /// field, or a value whose tag differs from the field declaration
    pub fn add<K, I>(&self, schema: &str, record_type: &str, values: I) -> Result<Arc<MemoryRecord>>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let _writer = self.writer.lock();
        let record_type = self.resolve(schema, record_type)?;
        let values = Self::validate(&record_type, values)?;
        let record = Arc::new(MemoryRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            record_type,
            values,
        });

        self.notify(StatAction::Add, &record);
        self.records.write().push(Arc::clone(&record));
        Ok(record)
    }

    /// Remove a record and notify attached stats
    ///
    /// # Errors
    /// [`StatError::NotFound`] if no record has this id
    pub fn remove(&self, id: RecordId) -> Result<Arc<MemoryRecord>> {
        let _writer = self.writer.lock();
        let record = {
            let mut records = self.records.write();
            let pos = records
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| StatError::NotFound(format!("record not found: {id}")))?;
            records.remove(pos)
        };
        self.notify(StatAction::Remove, &record);
        Ok(record)
    }

    /// Replace the values of a record
    ///
    /// Delivered to stats as a removal of the old record followed by an
    /// addition of the new one.
    ///
    /// # Errors
    /// [`StatError::NotFound`] for an unknown id, validation errors as for
    /// [`add`](Self::add)
    pub fn edit<K, I>(&self, id: RecordId, values: I) -> Result<Arc<MemoryRecord>>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let _writer = self.writer.lock();
        let (pos, old, new) = {
            let mut records = self.records.write();
            let pos = records
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| StatError::NotFound(format!("record not found: {id}")))?;
            let values = Self::validate(&records[pos].record_type, values)?;
            let old = records.remove(pos);
            let new = Arc::new(MemoryRecord {
                id,
                record_type: Arc::clone(&old.record_type),
                values,
            });
            (pos, old, new)
        };
        self.notify(StatAction::Remove, &old);
        self.notify(StatAction::Add, &new);

        let mut records = self.records.write();
        let pos = pos.min(records.len());
        records.insert(pos, Arc::clone(&new));
        Ok(new)
    }

    /// Find record by id
    #[must_use]
    pub fn record(&self, id: RecordId) -> Option<Arc<MemoryRecord>> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn resolve(&self, schema: &str, record_type: &str) -> Result<Arc<RecordTypeDesc>> {
        let schemas = self.schemas.read();
        let schema_ref = schemas
            .get(schema)
            .ok_or_else(|| StatError::InvalidArgument(format!("unknown schema '{schema}'")))?;
        schema_ref.find_record_type(record_type).ok_or_else(|| {
            StatError::InvalidArgument(format!(
                "unknown record type '{record_type}' for schema '{schema}'"
            ))
        })
    }

    fn validate<K, I>(record_type: &RecordTypeDesc, values: I) -> Result<BTreeMap<String, Value>>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut out = BTreeMap::new();
        for (name, value) in values {
            let name = name.into();
            let field = record_type.field_desc(&name).ok_or_else(|| {
                StatError::InvalidArgument(format!(
                    "unknown field '{name}' for record type '{}'",
                    record_type.name()
                ))
            })?;
            if !value.is_empty() && value.kind() != field.kind() {
                return Err(StatError::InvalidArgument(format!(
                    "field '{name}' expects {} but got {}",
                    field.kind(),
                    value.kind()
                )));
            }
            out.insert(name, value);
        }
        Ok(out)
    }

    fn notify(&self, action: StatAction, record: &Arc<MemoryRecord>) {
        let stats = self.stats.read().clone();
        let record: Arc<dyn Record> = Arc::clone(record) as Arc<dyn Record>;
        for stat in stats {
            stat.notify(action, &record);
        }
    }
}

impl RecordStore for InMemoryStore {
    fn find_schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.read().get(name).cloned()
    }

    fn all_records(&self) -> Vec<Arc<dyn Record>> {
        self.records
            .read()
            .iter()
            .map(|r| Arc::clone(r) as Arc<dyn Record>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDesc;
    use crate::value::ValueKind;

    fn store() -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        let mut schema = Schema::new("S");
        schema
            .add(RecordTypeDesc::new(
                "T",
                vec![
                    FieldDesc::new("N", ValueKind::Integer),
                    FieldDesc::new("L", ValueKind::String),
                ],
            ))
            .unwrap();
        store.add_schema(schema).unwrap();
        store
    }

    #[test]
    fn add_validates_fields() {
        let store = store();
        assert!(store.add("S", "T", [("N", Value::Integer(1))]).is_ok());
        assert!(store.add("X", "T", [("N", Value::Integer(1))]).is_err());
        assert!(store.add("S", "X", [("N", Value::Integer(1))]).is_err());
        assert!(store.add("S", "T", [("Z", Value::Integer(1))]).is_err());
        assert!(store.add("S", "T", [("N", Value::from("x"))]).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_and_edit() {
        let store = store();
        let r = store.add("S", "T", [("N", Value::Integer(1))]).unwrap();
        let edited = store.edit(r.id(), [("N", Value::Integer(5))]).unwrap();
        assert_eq!(edited.id(), r.id());
        assert_eq!(store.record(r.id()).unwrap().value("N"), Some(Value::Integer(5)));

        store.remove(r.id()).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.remove(r.id()), Err(StatError::NotFound(_))));
    }

    #[test]
    fn duplicate_schema_rejected() {
        let store = store();
        assert!(store.add_schema(Schema::new("S")).is_err());
        assert!(store.find_schema("S").is_some());
        assert!(store.find_schema("Q").is_none());
    }
}
