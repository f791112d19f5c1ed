//! Tally Core - incremental statistics over a live record collection
//!
//! A [`Stat`] groups [`StatField`]s. Each field binds one operation (min, max,
//! average, count, sum, last value, or a user operation registered in the
//! [`OpRegistry`]) to a `(schema, record type, field)` path of a
//! [`RecordStore`]. The store reports additions and removals through
//! [`Stat::notify`]; the stat keeps its values current incrementally where it
//! can and falls back to a full rescan where it must.
//!
//! # Example
//!
//! ```rust
//! use tally_core::prelude::*;
//!
//! # fn main() -> tally_core::Result<()> {
//! let store = InMemoryStore::new();
//! let mut schema = Schema::new("PersonSchema");
//! schema.add(RecordTypeDesc::new(
//!     "Person",
//!     vec![FieldDesc::new("Age", ValueKind::Integer)],
//! ))?;
//! store.add_schema(schema)?;
//!
//! let field = StatField::new("AgeMax", "PersonSchema", "Person", "Age", BuiltinOp::Max.name())?;
//! let stat = store.add_stat(Stat::new("People", vec![field], UpdateMode::Manual)?)?;
//!
//! store.add("PersonSchema", "Person", [("Age", Value::Integer(41))])?;
//! store.add("PersonSchema", "Person", [("Age", Value::Integer(53))])?;
//! stat.update(true, true)?;
//! assert_eq!(stat.value("AgeMax")?, Value::Integer(53));
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod field;
pub mod operation;
pub mod registry;
pub mod schema;
pub mod stat;
pub mod state;
pub mod store;
pub mod value;
mod worker;

pub use config::{ConfigFormat, StatConfig, StatFieldConfig, StatOptions, StatsDocument};
pub use error::{Result, StatError};
pub use field::{StatField, StatFieldDesc};
pub use operation::{
    AverageOp, BuiltinOp, CountOp, LastValueOp, MaxOp, MinOp, StatAction, StatOp, SumOp,
};
pub use registry::{OpConstructor, OpRegistry};
pub use schema::{FieldDesc, Record, RecordTypeDesc, Schema};
pub use stat::{Stat, DEFAULT_TIMER_PERIOD};
pub use state::{StatState, UpdateMode};
pub use store::{InMemoryStore, MemoryRecord, RecordId, RecordStore};
pub use value::{Value, ValueKind};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Tally Core
    pub use crate::{
        BuiltinOp, FieldDesc, InMemoryStore, OpRegistry, Record, RecordStore, RecordTypeDesc,
        Schema, Stat, StatAction, StatError, StatField, StatOp, StatState, UpdateMode, Value,
        ValueKind,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
