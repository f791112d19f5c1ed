//! Operation registry
//!
//! Provides [`OpRegistry`], the lock-guarded map from operation name to
//! constructor. Built-in operations are seeded lazily, exactly once, under the
//! same lock that guards every lookup and registration.

use crate::error::{Result, StatError};
use crate::operation::{BuiltinOp, StatOp};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Constructor of an operation instance; `None` signals a failed construction
pub type OpConstructor = fn() -> Option<Box<dyn StatOp>>;

static GLOBAL: Lazy<Arc<OpRegistry>> = Lazy::new(|| Arc::new(OpRegistry::new()));

fn builtin_min() -> Option<Box<dyn StatOp>> {
    Some(BuiltinOp::Min.instantiate())
}

fn builtin_max() -> Option<Box<dyn StatOp>> {
    Some(BuiltinOp::Max.instantiate())
}

fn builtin_average() -> Option<Box<dyn StatOp>> {
    Some(BuiltinOp::Average.instantiate())
}

fn builtin_count() -> Option<Box<dyn StatOp>> {
    Some(BuiltinOp::Count.instantiate())
}

fn builtin_sum() -> Option<Box<dyn StatOp>> {
    Some(BuiltinOp::Sum.instantiate())
}

fn builtin_last() -> Option<Box<dyn StatOp>> {
    Some(BuiltinOp::LastValue.instantiate())
}

fn builtin_constructor(op: BuiltinOp) -> OpConstructor {
    match op {
        BuiltinOp::Min => builtin_min,
        BuiltinOp::Max => builtin_max,
        BuiltinOp::Average => builtin_average,
        BuiltinOp::Count => builtin_count,
        BuiltinOp::Sum => builtin_sum,
        BuiltinOp::LastValue => builtin_last,
    }
}

/// Best-effort constructor identity by function address
///
/// Addresses are not guaranteed unique or stable: identical functions may be
/// merged into one, and one function may get distinct addresses in different
/// codegen units. Merged twins build identical operations, so accepting them
/// is harmless; a split address makes a repeated registration fail.
fn same_constructor(a: OpConstructor, b: OpConstructor) -> bool {
    a as usize == b as usize
}

#[derive(Debug, Default)]
struct RegistryInner {
    constructors: HashMap<String, OpConstructor>,
    builtins_seeded: bool,
}

impl RegistryInner {
    fn seeded(&mut self) -> &mut Self {
        if !self.builtins_seeded {
            for op in BuiltinOp::ALL {
                self.constructors
                    .insert(op.name().to_string(), builtin_constructor(op));
            }
            self.builtins_seeded = true;
        }
        self
    }
}

/// Registry of operation constructors
///
/// One process-wide instance is available through [`OpRegistry::global`];
/// tests and embedders can build private instances with [`OpRegistry::new`]
/// and inject them into stat fields.
#[derive(Debug, Default)]
pub struct OpRegistry {
    inner: Mutex<RegistryInner>,
}

impl OpRegistry {
    /// Create new registry; built-ins are added on first use
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide shared registry
    #[inline]
    #[must_use]
    pub fn global() -> Arc<OpRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Canonical registry key of a built-in operation
    #[inline]
    #[must_use]
    pub fn builtin_name(op: BuiltinOp) -> &'static str {
        op.name()
    }

    /// Instantiate a fresh operation
    ///
    /// # Errors
    /// - [`StatError::NotFound`] if no constructor is registered under `name`
    /// - [`StatError::Internal`] if the constructor produced no instance
    pub fn create(&self, name: &str) -> Result<Box<dyn StatOp>> {
        let ctor = {
            let mut inner = self.inner.lock();
            inner
                .seeded()
                .constructors
                .get(name)
                .copied()
                .ok_or_else(|| StatError::NotFound(format!("operation not registered: '{name}'")))?
        };

        ctor().ok_or_else(|| StatError::Internal(format!("operation '{name}' was not created")))
    }

    /// Register a user operation
    ///
    /// The name is taken from a freshly constructed instance. Registering the
    /// same constructor twice is a no-op.
    ///
    /// # Errors
    /// - [`StatError::InvalidArgument`] if the constructor produces no
    ///   instance, the instance has an empty name, or the name is already
    ///   registered with a different constructor
    pub fn register(&self, ctor: OpConstructor) -> Result<String> {
        let probe = ctor().ok_or_else(|| {
            StatError::InvalidArgument("operation constructor produced no instance".to_string())
        })?;
        let name = probe.name().to_string();
        if name.is_empty() {
            return Err(StatError::InvalidArgument(
                "operation name must not be empty".to_string(),
            ));
        }

        let mut inner = self.inner.lock();
        let constructors = &mut inner.seeded().constructors;
        match constructors.get(&name).copied() {
            Some(existing) if same_constructor(existing, ctor) => {}
            Some(_) => {
                return Err(StatError::InvalidArgument(format!(
                    "operation '{name}' registered twice with different implementation"
                )));
            }
            None => {
                tracing::debug!("Registered operation: {}", name);
                constructors.insert(name.clone(), ctor);
            }
        }
        Ok(name)
    }

    /// Check if an operation is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().seeded().constructors.contains_key(name)
    }

    /// Sorted list of registered operation names
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        let mut names: Vec<String> = inner.seeded().constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().seeded().constructors.len()
    }

    /// Check if registry is empty (never true once built-ins are seeded)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::StatAction;
    use crate::value::Value;

    #[derive(Debug, Default)]
    struct Echo {
        value: Value,
        // keeps the two constructors distinct
        #[allow(dead_code)]
        generation: u8,
    }

    impl StatOp for Echo {
        fn name(&self) -> &str {
            "test.echo"
        }

        fn reset(&mut self) {
            self.value = Value::Empty;
        }

        fn handle(&mut self, action: StatAction, value: &Value) -> Result<bool> {
            match action {
                StatAction::Add => {
                    self.value = value.clone();
                    Ok(true)
                }
                StatAction::Remove => Ok(false),
            }
        }

        fn value(&self) -> Value {
            self.value.clone()
        }
    }

    fn echo() -> Option<Box<dyn StatOp>> {
        Some(Box::new(Echo::default()))
    }

    fn echo_again() -> Option<Box<dyn StatOp>> {
        Some(Box::new(Echo {
            value: Value::Empty,
            generation: 2,
        }))
    }

    fn nothing() -> Option<Box<dyn StatOp>> {
        None
    }

    #[test]
    fn registry_with_builtins() {
        let registry = OpRegistry::new();
        assert_eq!(registry.len(), 6);
        for op in BuiltinOp::ALL {
            assert!(registry.contains(OpRegistry::builtin_name(op)));
            assert_eq!(registry.create(op.name()).unwrap().name(), op.name());
        }
    }

    #[test]
    fn registry_unknown_name() {
        let registry = OpRegistry::new();
        assert!(matches!(
            registry.create("AnyUnknownStringYouWant"),
            Err(StatError::NotFound(_))
        ));
    }

    #[test]
    fn registry_register_twice() {
        let registry = OpRegistry::new();
        assert_eq!(registry.register(echo).unwrap(), "test.echo");
        assert!(registry.register(echo).is_ok());
        assert!(matches!(
            registry.register(echo_again),
            Err(StatError::InvalidArgument(_))
        ));
        assert_eq!(registry.create("test.echo").unwrap().name(), "test.echo");
    }

    #[test]
    fn constructor_identity() {
        assert!(same_constructor(echo, echo));
        assert!(!same_constructor(echo, echo_again));
        assert!(!same_constructor(echo, nothing));
    }

    #[test]
    fn registry_rejects_null_constructor() {
        let registry = OpRegistry::new();
        assert!(matches!(
            registry.register(nothing),
            Err(StatError::InvalidArgument(_))
        ));
    }

    #[test]
    fn registry_names_sorted() {
        let registry = OpRegistry::new();
        let names = registry.names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(!registry.is_empty());
    }
}
