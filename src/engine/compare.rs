use std::cmp::Ordering;

use super::{Comparator, Constraint, EngineError, FieldId, Record, Value, HEIGHT_EPSILON};

/// Checks whether `record` satisfies `constraint`.
///
/// `ID` and `AGE` compare as integers, `HEIGHT` as floats with an epsilon
/// on equality, `NAME` byte-lexicographically. An integer literal is
/// accepted for `HEIGHT`. Any other field/value pairing is an
/// [`EngineError::UnsupportedComparison`].
pub fn satisfies(record: &Record, constraint: &Constraint) -> Result<bool, EngineError> {
    let Constraint {
        field,
        comparator,
        value,
    } = constraint;

    match (field, value) {
        (FieldId::Id, Value::Int(v)) => Ok(int_cmp(*comparator, record.id, *v)),
        (FieldId::Age, Value::Int(v)) => Ok(int_cmp(*comparator, record.age, *v)),
        (FieldId::Height, Value::Float(v)) => Ok(float_cmp(*comparator, record.height, *v)),
        (FieldId::Height, Value::Int(v)) => Ok(float_cmp(*comparator, record.height, f64::from(*v))),
        (FieldId::Name, Value::Text(v)) => Ok(ordering_matches(*comparator, record.name.as_str().cmp(v.as_str()))),
        _ => Err(unsupported(constraint)),
    }
}

/// Rejects a constraint whose value type does not fit its field, without
/// looking at any record.
///
/// Handlers call this before scanning, so a malformed constraint fails the
/// same way on an empty table as on a full one.
pub fn check_constraint(constraint: &Constraint) -> Result<(), EngineError> {
    match (constraint.field, &constraint.value) {
        (FieldId::Id | FieldId::Age, Value::Int(_))
        | (FieldId::Height, Value::Int(_) | Value::Float(_))
        | (FieldId::Name, Value::Text(_)) => Ok(()),
        _ => Err(unsupported(constraint)),
    }
}

fn unsupported(constraint: &Constraint) -> EngineError {
    EngineError::UnsupportedComparison {
        field: constraint.field,
        value: constraint.value.clone(),
    }
}

fn int_cmp(comparator: Comparator, lhs: i32, rhs: i32) -> bool {
    ordering_matches(comparator, lhs.cmp(&rhs))
}

fn float_cmp(comparator: Comparator, lhs: f64, rhs: f64) -> bool {
    match comparator {
        Comparator::Equal => (lhs - rhs).abs() < HEIGHT_EPSILON,
        Comparator::Lower => lhs < rhs,
        Comparator::LowerOrEqual => lhs <= rhs,
        Comparator::Greater => lhs > rhs,
        Comparator::GreaterOrEqual => lhs >= rhs,
    }
}

fn ordering_matches(comparator: Comparator, ord: Ordering) -> bool {
    match comparator {
        Comparator::Lower => ord == Ordering::Less,
        Comparator::LowerOrEqual => ord != Ordering::Greater,
        Comparator::Greater => ord == Ordering::Greater,
        Comparator::GreaterOrEqual => ord != Ordering::Less,
        Comparator::Equal => ord == Ordering::Equal,
    }
}
