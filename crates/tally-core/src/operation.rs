//! Statistics operations
//!
//! Provides the [`StatOp`] trait for resettable, incrementally updatable
//! reductions and the six built-in operations.
//!
//! | Operation | Domain | Remove | Reset value | Output |
//! |---|---|---|---|---|
//! | [`MinOp`] | integer, real | never | empty | input type |
//! | [`MaxOp`] | integer, real | never | empty | input type |
//! | [`AverageOp`] | integer, real | yes | empty | real |
//! | [`CountOp`] | any | yes | integer 0 | integer |
//! | [`SumOp`] | integer, real | yes | empty | input type |
//! | [`LastValueOp`] | any | never | empty | input type |

use crate::error::{Result, StatError};
use crate::value::{Value, ValueKind};
use std::cmp::Ordering;
use std::fmt;

/// Point-wise change applied to an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatAction {
    /// A value joined the collection
    Add,
    /// A value left the collection
    Remove,
}

impl fmt::Display for StatAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// Resettable reduction over a sequence of [`Value`]s
///
/// Built-in and user operations are symmetric: both are created through the
/// [`OpRegistry`](crate::OpRegistry) from a registered constructor.
pub trait StatOp: Send + fmt::Debug {
    /// Registry key of this operation
    fn name(&self) -> &str;

    /// Clear the accumulator to its canonical empty/zero state
    fn reset(&mut self);

    /// Apply a point-wise change
    ///
    /// # Returns
    /// - `Ok(true)` if the accumulator was updated in place
    /// - `Ok(false)` if the change cannot be applied incrementally
    ///
    /// # Errors
    /// - [`StatError::TypeMismatch`] if the value's tag conflicts with the
    ///   accumulator
    /// - [`StatError::NotSupported`] if the value is outside the domain or the
    ///   action has no incremental implementation
    fn handle(&mut self, action: StatAction, value: &Value) -> Result<bool>;

    /// Current result; reading never mutates the accumulator
    fn value(&self) -> Value;
}

/// Identifier of a built-in operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinOp {
    /// Smallest value
    Min,
    /// Largest value
    Max,
    /// Arithmetic mean
    Average,
    /// Number of values
    Count,
    /// Sum of values
    Sum,
    /// Most recently added value
    LastValue,
}

impl BuiltinOp {
    /// All built-in operations, in registration order
    pub const ALL: [BuiltinOp; 6] = [
        Self::Min,
        Self::Max,
        Self::Average,
        Self::Count,
        Self::Sum,
        Self::LastValue,
    ];

    /// Canonical registry key
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Min => "tally.builtin.min",
            Self::Max => "tally.builtin.max",
            Self::Average => "tally.builtin.average",
            Self::Count => "tally.builtin.count",
            Self::Sum => "tally.builtin.sum",
            Self::LastValue => "tally.builtin.last",
        }
    }

    /// Fresh instance of this operation
    #[must_use]
    pub fn instantiate(self) -> Box<dyn StatOp> {
        match self {
            Self::Min => Box::new(MinOp::default()),
            Self::Max => Box::new(MaxOp::default()),
            Self::Average => Box::new(AverageOp::default()),
            Self::Count => Box::new(CountOp::default()),
            Self::Sum => Box::new(SumOp::default()),
            Self::LastValue => Box::new(LastValueOp::default()),
        }
    }
}

fn require_numeric(op: &str, value: &Value) -> Result<()> {
    match value {
        Value::Integer(_) | Value::Real(_) => Ok(()),
        other => Err(StatError::unsupported_kind(op, other.kind())),
    }
}

fn require_same_kind(held: ValueKind, value: &Value) -> Result<()> {
    if held == value.kind() {
        Ok(())
    } else {
        Err(StatError::TypeMismatch {
            expected: held,
            found: value.kind(),
        })
    }
}

fn compare_numeric(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
        _ => None,
    }
}

fn add_numeric(op: &str, acc: &Value, value: &Value) -> Result<Value> {
    match (acc, value) {
        (Value::Integer(a), Value::Integer(b)) => a
            .checked_add(*b)
            .map(Value::Integer)
            .ok_or_else(|| StatError::NotSupported(format!("integer overflow in '{op}'"))),
        (Value::Real(a), Value::Real(b)) => Ok(Value::Real(a + b)),
        _ => Err(StatError::TypeMismatch {
            expected: acc.kind(),
            found: value.kind(),
        }),
    }
}

fn sub_numeric(op: &str, acc: &Value, value: &Value) -> Result<Value> {
    match (acc, value) {
        (Value::Integer(a), Value::Integer(b)) => a
            .checked_sub(*b)
            .map(Value::Integer)
            .ok_or_else(|| StatError::NotSupported(format!("integer overflow in '{op}'"))),
        (Value::Real(a), Value::Real(b)) => Ok(Value::Real(a - b)),
        _ => Err(StatError::TypeMismatch {
            expected: acc.kind(),
            found: value.kind(),
        }),
    }
}

/// Shared add path of [`MinOp`] and [`MaxOp`]
fn keep_extremum(op: &str, held: &mut Value, value: &Value, keep: Ordering) -> Result<bool> {
    require_numeric(op, value)?;
    if held.is_empty() {
        *held = value.clone();
        return Ok(true);
    }
    require_same_kind(held.kind(), value)?;
    if compare_numeric(value, held) == Some(keep) {
        *held = value.clone();
    }
    Ok(true)
}

fn no_remove(op: &str, held_empty: bool) -> StatError {
    if held_empty {
        StatError::remove_from_empty(op)
    } else {
        StatError::NotSupported(format!("'{op}' cannot remove values incrementally"))
    }
}

/// Smallest value seen
#[derive(Debug, Clone, Default)]
pub struct MinOp {
    value: Value,
}

impl StatOp for MinOp {
    fn name(&self) -> &str {
        BuiltinOp::Min.name()
    }

    fn reset(&mut self) {
        self.value = Value::Empty;
    }

    fn handle(&mut self, action: StatAction, value: &Value) -> Result<bool> {
        match action {
            StatAction::Add => keep_extremum(BuiltinOp::Min.name(), &mut self.value, value, Ordering::Less),
            StatAction::Remove => Err(no_remove(self.name(), self.value.is_empty())),
        }
    }

    fn value(&self) -> Value {
        self.value.clone()
    }
}

/// Largest value seen
#[derive(Debug, Clone, Default)]
pub struct MaxOp {
    value: Value,
}

impl StatOp for MaxOp {
    fn name(&self) -> &str {
        BuiltinOp::Max.name()
    }

    fn reset(&mut self) {
        self.value = Value::Empty;
    }

    fn handle(&mut self, action: StatAction, value: &Value) -> Result<bool> {
        match action {
            StatAction::Add => {
                keep_extremum(BuiltinOp::Max.name(), &mut self.value, value, Ordering::Greater)
            }
            StatAction::Remove => Err(no_remove(self.name(), self.value.is_empty())),
        }
    }

    fn value(&self) -> Value {
        self.value.clone()
    }
}

/// Arithmetic mean, kept as running sum and count
#[derive(Debug, Clone, Default)]
pub struct AverageOp {
    sum: Value,
    count: i64,
}

impl StatOp for AverageOp {
    fn name(&self) -> &str {
        BuiltinOp::Average.name()
    }

    fn reset(&mut self) {
        self.sum = Value::Empty;
        self.count = 0;
    }

    fn handle(&mut self, action: StatAction, value: &Value) -> Result<bool> {
        match action {
            StatAction::Add => {
                require_numeric(self.name(), value)?;
                if self.sum.is_empty() {
                    self.sum = value.clone();
                    self.count = 1;
                } else {
                    self.sum = add_numeric(self.name(), &self.sum, value)?;
                    self.count += 1;
                }
            }
            StatAction::Remove => {
                if self.sum.is_empty() {
                    return Err(StatError::remove_from_empty(self.name()));
                }
                require_numeric(self.name(), value)?;
                let sum = sub_numeric(self.name(), &self.sum, value)?;
                self.count -= 1;
                if self.count == 0 {
                    self.reset();
                } else {
                    self.sum = sum;
                }
            }
        }
        Ok(true)
    }

    #[allow(clippy::cast_precision_loss)]
    fn value(&self) -> Value {
        match self.sum {
            Value::Integer(sum) => Value::Real(sum as f64 / self.count as f64),
            Value::Real(sum) => Value::Real(sum / self.count as f64),
            _ => Value::Empty,
        }
    }
}

/// Number of values
///
/// Accepts every tag, but the first non-empty tag seen fixes the tag of the
/// sequence until the next reset.
#[derive(Debug, Clone, Default)]
pub struct CountOp {
    count: i64,
    kind: Option<ValueKind>,
}

impl CountOp {
    fn check_kind(&mut self, value: &Value) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        match self.kind {
            Some(held) => require_same_kind(held, value),
            None => {
                self.kind = Some(value.kind());
                Ok(())
            }
        }
    }
}

impl StatOp for CountOp {
    fn name(&self) -> &str {
        BuiltinOp::Count.name()
    }

    fn reset(&mut self) {
        self.count = 0;
        self.kind = None;
    }

    fn handle(&mut self, action: StatAction, value: &Value) -> Result<bool> {
        match action {
            StatAction::Add => {
                self.check_kind(value)?;
                self.count += 1;
            }
            StatAction::Remove => {
                if self.count == 0 {
                    return Err(StatError::remove_from_empty(self.name()));
                }
                self.check_kind(value)?;
                self.count -= 1;
                if self.count == 0 {
                    self.kind = None;
                }
            }
        }
        Ok(true)
    }

    fn value(&self) -> Value {
        Value::Integer(self.count)
    }
}

/// Sum of values
#[derive(Debug, Clone, Default)]
pub struct SumOp {
    sum: Value,
}

impl StatOp for SumOp {
    fn name(&self) -> &str {
        BuiltinOp::Sum.name()
    }

    fn reset(&mut self) {
        self.sum = Value::Empty;
    }

    fn handle(&mut self, action: StatAction, value: &Value) -> Result<bool> {
        match action {
            StatAction::Add => {
                require_numeric(self.name(), value)?;
                self.sum = if self.sum.is_empty() {
                    value.clone()
                } else {
                    add_numeric(self.name(), &self.sum, value)?
                };
            }
            StatAction::Remove => {
                if self.sum.is_empty() {
                    return Err(StatError::remove_from_empty(self.name()));
                }
                require_numeric(self.name(), value)?;
                self.sum = sub_numeric(self.name(), &self.sum, value)?;
            }
        }
        Ok(true)
    }

    fn value(&self) -> Value {
        self.sum.clone()
    }
}

/// Most recently added value
#[derive(Debug, Clone, Default)]
pub struct LastValueOp {
    value: Value,
}

impl StatOp for LastValueOp {
    fn name(&self) -> &str {
        BuiltinOp::LastValue.name()
    }

    fn reset(&mut self) {
        self.value = Value::Empty;
    }

    fn handle(&mut self, action: StatAction, value: &Value) -> Result<bool> {
        match action {
            StatAction::Add => {
                if !self.value.is_empty() && !value.is_empty() {
                    require_same_kind(self.value.kind(), value)?;
                }
                self.value = value.clone();
                Ok(true)
            }
            StatAction::Remove => Err(no_remove(self.name(), self.value.is_empty())),
        }
    }

    fn value(&self) -> Value {
        self.value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(op: &mut dyn StatOp, values: &[i64]) {
        for v in values {
            assert!(op.handle(StatAction::Add, &Value::Integer(*v)).unwrap());
        }
    }

    #[test]
    fn reset_values() {
        for builtin in BuiltinOp::ALL {
            let mut op = builtin.instantiate();
            op.handle(StatAction::Add, &Value::Integer(4)).unwrap();
            op.reset();
            let expected = if builtin == BuiltinOp::Count {
                Value::Integer(0)
            } else {
                Value::Empty
            };
            assert_eq!(op.value(), expected, "{}", builtin.name());
        }
    }

    #[test]
    fn names_match_builtin_keys() {
        for builtin in BuiltinOp::ALL {
            assert_eq!(builtin.instantiate().name(), builtin.name());
        }
    }

    #[test]
    fn min_max_keep_extremes() {
        let mut min = MinOp::default();
        let mut max = MaxOp::default();
        ints(&mut min, &[131, -13, 75]);
        ints(&mut max, &[131, -13, 75]);
        assert_eq!(min.value(), Value::Integer(-13));
        assert_eq!(max.value(), Value::Integer(131));
    }

    #[test]
    fn min_rejects_strings() {
        let mut min = MinOp::default();
        let err = min.handle(StatAction::Add, &Value::from("a")).unwrap_err();
        assert!(matches!(err, StatError::NotSupported(_)));
    }

    #[test]
    fn remove_unsupported_for_min_max_last() {
        for builtin in [BuiltinOp::Min, BuiltinOp::Max, BuiltinOp::LastValue] {
            let mut op = builtin.instantiate();
            let v = Value::Integer(1);
            assert!(matches!(
                op.handle(StatAction::Remove, &v),
                Err(StatError::NotSupported(_))
            ));
            op.handle(StatAction::Add, &v).unwrap();
            assert!(matches!(
                op.handle(StatAction::Remove, &v),
                Err(StatError::NotSupported(_))
            ));
        }
    }

    #[test]
    fn average_of_integers_is_real() {
        let mut avg = AverageOp::default();
        ints(&mut avg, &[131, -13, 75]);
        let Value::Real(v) = avg.value() else {
            panic!("average must be real");
        };
        assert!((v - 193.0 / 3.0).abs() < 1e-12);

        avg.handle(StatAction::Remove, &Value::Integer(75)).unwrap();
        assert_eq!(avg.value(), Value::Real(59.0));
    }

    #[test]
    fn average_remove_last_returns_to_empty() {
        let mut avg = AverageOp::default();
        ints(&mut avg, &[10]);
        avg.handle(StatAction::Remove, &Value::Integer(10)).unwrap();
        assert_eq!(avg.value(), Value::Empty);
        assert!(avg.handle(StatAction::Remove, &Value::Integer(10)).is_err());
    }

    #[test]
    fn count_add_remove() {
        let mut count = CountOp::default();
        assert!(matches!(
            count.handle(StatAction::Remove, &Value::Integer(1)),
            Err(StatError::NotSupported(_))
        ));
        ints(&mut count, &[1, 2, 3]);
        count.handle(StatAction::Remove, &Value::Integer(2)).unwrap();
        assert_eq!(count.value(), Value::Integer(2));
    }

    #[test]
    fn type_mismatch_for_every_builtin() {
        for builtin in BuiltinOp::ALL {
            let mut op = builtin.instantiate();
            op.handle(StatAction::Add, &Value::Integer(131)).unwrap();
            let err = op.handle(StatAction::Add, &Value::Real(77.13)).unwrap_err();
            assert!(
                matches!(err, StatError::TypeMismatch { .. }),
                "{} gave {err:?}",
                builtin.name()
            );
        }
    }

    #[test]
    fn sum_reals() {
        let mut sum = SumOp::default();
        for v in [36.6, 307.1, -3.14] {
            sum.handle(StatAction::Add, &Value::Real(v)).unwrap();
        }
        sum.handle(StatAction::Remove, &Value::Real(36.6)).unwrap();
        let Value::Real(v) = sum.value() else {
            panic!("sum of reals must be real");
        };
        assert!((v - (307.1 - 3.14)).abs() < 1e-9);
    }

    #[test]
    fn sum_integer_overflow_is_not_supported() {
        let mut sum = SumOp::default();
        ints(&mut sum, &[i64::MAX]);
        assert!(matches!(
            sum.handle(StatAction::Add, &Value::Integer(1)),
            Err(StatError::NotSupported(_))
        ));
    }

    #[test]
    fn last_value_tracks_latest() {
        let mut last = LastValueOp::default();
        for name in ["Peter", "Jessica", "John"] {
            last.handle(StatAction::Add, &Value::from(name)).unwrap();
        }
        assert_eq!(last.value(), Value::from("John"));
    }
}
