//! Stat fields
//!
//! A [`StatField`] binds one operation instance to a
//! `(schema, record type, field)` path of a record store. The path is resolved
//! when the field is attached to a store and forgotten when it is detached; a
//! field is either fully resolved or not resolved at all.

use crate::error::{Result, StatError};
use crate::operation::{StatAction, StatOp};
use crate::registry::OpRegistry;
use crate::schema::{FieldDesc, Record, RecordTypeDesc};
use crate::state::StatState;
use crate::store::RecordStore;
use crate::value::Value;
use std::sync::{Arc, Weak};

/// Immutable identity of a stat field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatFieldDesc {
    /// Stat field name, unique inside its stat
    pub name: String,
    /// Schema holding the record type
    pub schema_name: String,
    /// Record type whose records feed the operation
    pub record_type_name: String,
    /// Field of the record type fed into the operation
    pub field_name: String,
    /// Registry key of the operation
    pub op_name: String,
}

/// Resolved path inside an attached store
#[derive(Debug)]
struct FieldBinding {
    store: Weak<dyn RecordStore>,
    record_type: Arc<RecordTypeDesc>,
    field: FieldDesc,
}

/// One operation bound to a record field
#[derive(Debug)]
pub struct StatField {
    desc: StatFieldDesc,
    op: Box<dyn StatOp>,
    registry: Arc<OpRegistry>,
    binding: Option<FieldBinding>,
    dirty: bool,
}

impl StatField {
    /// Create stat field using the process-wide operation registry
    ///
    /// # Errors
    /// [`StatError::NotFound`] if `op_name` is not registered
    pub fn new(
        name: impl Into<String>,
        schema_name: impl Into<String>,
        record_type_name: impl Into<String>,
        field_name: impl Into<String>,
        op_name: impl Into<String>,
    ) -> Result<Self> {
        Self::with_registry(
            name,
            schema_name,
            record_type_name,
            field_name,
            op_name,
            OpRegistry::global(),
        )
    }

    /// Create stat field using a specific operation registry
    ///
    /// The operation is instantiated immediately; schema resolution waits
    /// until [`attach`](Self::attach).
    ///
    /// # Errors
    /// [`StatError::NotFound`] if `op_name` is not registered
    pub fn with_registry(
        name: impl Into<String>,
        schema_name: impl Into<String>,
        record_type_name: impl Into<String>,
        field_name: impl Into<String>,
        op_name: impl Into<String>,
        registry: Arc<OpRegistry>,
    ) -> Result<Self> {
        let desc = StatFieldDesc {
            name: name.into(),
            schema_name: schema_name.into(),
            record_type_name: record_type_name.into(),
            field_name: field_name.into(),
            op_name: op_name.into(),
        };
        Self::from_desc(desc, registry)
    }

    /// Create stat field from its descriptor
    ///
    /// # Errors
    /// [`StatError::NotFound`] if the operation is not registered
    pub fn from_desc(desc: StatFieldDesc, registry: Arc<OpRegistry>) -> Result<Self> {
        let op = registry.create(&desc.op_name)?;
        Ok(Self {
            desc,
            op,
            registry,
            binding: None,
            dirty: false,
        })
    }

    /// Copy with a fresh accumulator of the same operation, unresolved
    ///
    /// # Errors
    /// Propagates registry failures
    pub fn try_clone(&self) -> Result<Self> {
        Self::from_desc(self.desc.clone(), Arc::clone(&self.registry))
    }

    /// Field identity
    #[inline]
    #[must_use]
    pub fn desc(&self) -> &StatFieldDesc {
        &self.desc
    }

    /// Stat field name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Schema name
    #[inline]
    #[must_use]
    pub fn schema_name(&self) -> &str {
        &self.desc.schema_name
    }

    /// Record type name
    #[inline]
    #[must_use]
    pub fn record_type_name(&self) -> &str {
        &self.desc.record_type_name
    }

    /// Record field name
    #[inline]
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.desc.field_name
    }

    /// Operation registry key
    #[inline]
    #[must_use]
    pub fn op_name(&self) -> &str {
        &self.desc.op_name
    }

    /// Current operation result
    #[inline]
    #[must_use]
    pub fn value(&self) -> Value {
        self.op.value()
    }

    /// Check if the accumulator needs a rescan
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Check if the field is attached to a live store
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.store().is_some()
    }

    /// Resolved record type, present only while attached
    #[inline]
    #[must_use]
    pub fn record_type_desc(&self) -> Option<&Arc<RecordTypeDesc>> {
        self.binding.as_ref().map(|b| &b.record_type)
    }

    /// Resolved field descriptor, present only while attached
    #[inline]
    #[must_use]
    pub fn field_desc(&self) -> Option<&FieldDesc> {
        self.binding.as_ref().map(|b| &b.field)
    }

    fn store(&self) -> Option<Arc<dyn RecordStore>> {
        self.binding.as_ref().and_then(|b| b.store.upgrade())
    }

    /// Resolve the field path against a store
    ///
    /// On failure the field is left unresolved.
    ///
    /// # Errors
    /// [`StatError::InvalidArgument`] naming the unknown schema, record type
    /// or field
    pub fn attach(&mut self, store: &Arc<dyn RecordStore>) -> Result<()> {
        self.binding = None;

        let d = &self.desc;
        let schema = store.find_schema(&d.schema_name).ok_or_else(|| {
            StatError::InvalidArgument(format!("unknown schema '{}'", d.schema_name))
        })?;
        let record_type = schema.find_record_type(&d.record_type_name).ok_or_else(|| {
            StatError::InvalidArgument(format!(
                "unknown record type '{}' for schema '{}'",
                d.record_type_name, d.schema_name
            ))
        })?;
        let field = record_type
            .field_desc(&d.field_name)
            .cloned()
            .ok_or_else(|| {
                StatError::InvalidArgument(format!(
                    "unknown field '{}' for record type '{}' for schema '{}'",
                    d.field_name, d.record_type_name, d.schema_name
                ))
            })?;

        self.binding = Some(FieldBinding {
            store: Arc::downgrade(store),
            record_type,
            field,
        });
        self.dirty = true;
        Ok(())
    }

    /// Forget the resolved path
    #[inline]
    pub fn detach(&mut self) {
        self.binding = None;
    }

    /// Apply an added record incrementally
    ///
    /// Records of other types, and any record while the field is inactive,
    /// are ignored. Operation failures never escape: they mark the field
    /// dirty and report [`StatState::NeedsRescan`].
    pub fn handle(&mut self, record: &dyn Record) -> StatState {
        let Some(binding) = &self.binding else {
            return StatState::UpToDate;
        };
        if !record.record_type().same_type(&binding.record_type) {
            return StatState::UpToDate;
        }
        if self.dirty {
            return StatState::NeedsRescan;
        }
        let Some(value) = record.value(binding.field.name()) else {
            return StatState::UpToDate;
        };

        match self.op.handle(StatAction::Add, &value) {
            Ok(true) => StatState::UpToDate,
            Ok(false) => {
                tracing::debug!("Field '{}' declined incremental add", self.desc.name);
                self.dirty = true;
                StatState::NeedsRescan
            }
            Err(e) => {
                tracing::warn!(
                    "Field '{}' marked for rescan after incremental add failed: {}",
                    self.desc.name,
                    e
                );
                self.dirty = true;
                StatState::NeedsRescan
            }
        }
    }

    /// Recompute the accumulator from every record of the store
    ///
    /// Runs when the field is active and either `force` is set or the field
    /// is dirty.
    ///
    /// # Errors
    /// Any operation error; a rescan has no fallback left
    pub fn rescan(&mut self, force: bool) -> Result<()> {
        if !(force || self.dirty) {
            return Ok(());
        }
        let Some(store) = self.store() else {
            return Ok(());
        };
        let records = store.all_records();
        self.rescan_from(force, &records)
    }

    /// Recompute the accumulator from a snapshot taken by the caller
    ///
    /// Lets a stat feed all of its fields from one consistent snapshot.
    ///
    /// # Errors
    /// Any operation error
    pub fn rescan_from(&mut self, force: bool, records: &[Arc<dyn Record>]) -> Result<()> {
        if !(force || self.dirty) {
            return Ok(());
        }
        let Some(binding) = self.binding.as_ref() else {
            return Ok(());
        };

        self.op.reset();
        self.dirty = true;
        for record in records {
            if !record.record_type().same_type(&binding.record_type) {
                continue;
            }
            let Some(value) = record.value(binding.field.name()) else {
                continue;
            };
            if !self.op.handle(StatAction::Add, &value)? {
                return Err(StatError::NotSupported(format!(
                    "operation '{}' declined a value during rescan",
                    self.desc.op_name
                )));
            }
        }
        self.dirty = false;
        Ok(())
    }

    /// Reset the accumulator and clear the dirty flag
    #[inline]
    pub fn reset(&mut self) {
        self.op.reset();
        self.dirty = false;
    }
}
