//! Testing utilities for the tally workspace
//!
//! Shared fixtures: the `Person` schema, the four sample people, stat field
//! helpers and a user-defined operation.

#![allow(missing_docs)]

use std::sync::Arc;
use tally_core::{
    BuiltinOp, FieldDesc, InMemoryStore, MemoryRecord, RecordTypeDesc, Result, Schema, StatAction,
    StatError, StatField, StatOp, Value, ValueKind,
};

pub const PERSON_SCHEMA: &str = "PersonSchema";
pub const PERSON: &str = "Person";

/// `(Name, Age, Growth, Salary)` of the sample people
pub const PEOPLE: [(&str, i64, i64, i64); 4] = [
    ("Peter", 53, 185, 5000),
    ("Jessica", 31, 176, 3000),
    ("Matthias", 41, 192, 7000),
    ("John", 29, 180, 5500),
];

pub fn person_schema() -> Schema {
    let mut schema = Schema::new(PERSON_SCHEMA);
    schema
        .add(RecordTypeDesc::new(
            PERSON,
            vec![
                FieldDesc::new("Name", ValueKind::String),
                FieldDesc::new("Age", ValueKind::Integer),
                FieldDesc::new("Growth", ValueKind::Integer),
                FieldDesc::new("Salary", ValueKind::Integer),
            ],
        ))
        .unwrap();
    schema
}

/// Empty store with the person schema registered
pub fn person_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.add_schema(person_schema()).unwrap();
    store
}

pub fn add_person(
    store: &InMemoryStore,
    name: &str,
    age: i64,
    growth: i64,
    salary: i64,
) -> Arc<MemoryRecord> {
    store
        .add(
            PERSON_SCHEMA,
            PERSON,
            [
                ("Name", Value::from(name)),
                ("Age", Value::Integer(age)),
                ("Growth", Value::Integer(growth)),
                ("Salary", Value::Integer(salary)),
            ],
        )
        .unwrap()
}

pub fn add_people(store: &InMemoryStore) -> Vec<Arc<MemoryRecord>> {
    PEOPLE
        .iter()
        .map(|&(name, age, growth, salary)| add_person(store, name, age, growth, salary))
        .collect()
}

pub fn person_field(name: &str, field: &str, op: BuiltinOp) -> StatField {
    StatField::new(name, PERSON_SCHEMA, PERSON, field, op.name()).unwrap()
}

/// `Count`, `Last`, `AgeMin`, `AgeMax`, `GrowthAverage`, `SalarySum`
pub fn person_stat_fields() -> Vec<StatField> {
    vec![
        person_field("Count", "Name", BuiltinOp::Count),
        person_field("Last", "Name", BuiltinOp::LastValue),
        person_field("AgeMin", "Age", BuiltinOp::Min),
        person_field("AgeMax", "Age", BuiltinOp::Max),
        person_field("GrowthAverage", "Growth", BuiltinOp::Average),
        person_field("SalarySum", "Salary", BuiltinOp::Sum),
    ]
}

/// Values of [`person_stat_fields`] over [`PEOPLE`]
pub fn expected_person_values() -> Vec<(String, Value)> {
    [
        ("Count", Value::Integer(4)),
        ("Last", Value::from("John")),
        ("AgeMin", Value::Integer(29)),
        ("AgeMax", Value::Integer(53)),
        ("GrowthAverage", Value::Real(183.25)),
        ("SalarySum", Value::Integer(20500)),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

/// User operation: length of the longest string seen
#[derive(Debug, Default)]
pub struct LongestOp {
    longest: Option<i64>,
}

impl LongestOp {
    pub const NAME: &'static str = "test.longest";

    pub fn constructor() -> Option<Box<dyn StatOp>> {
        Some(Box::new(Self::default()))
    }
}

impl StatOp for LongestOp {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn reset(&mut self) {
        self.longest = None;
    }

    fn handle(&mut self, action: StatAction, value: &Value) -> Result<bool> {
        let Value::String(s) = value else {
            return Err(StatError::unsupported_kind(Self::NAME, value.kind()));
        };
        match action {
            StatAction::Add => {
                let len = i64::try_from(s.chars().count()).unwrap_or(i64::MAX);
                self.longest = Some(self.longest.map_or(len, |l| l.max(len)));
                Ok(true)
            }
            // the runner-up is unknown
            StatAction::Remove => Ok(false),
        }
    }

    fn value(&self) -> Value {
        self.longest.map_or(Value::Empty, Value::Integer)
    }
}
