use thiserror::Error;

use super::{FieldId, Value};

/// Failures a single query can hit while running against the record store.
///
/// None of these are fatal to the process: the dispatcher renders them as a
/// short `ERROR:` result and the store invariants stay intact.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Record id outside `[0, capacity)`.
    #[error("id {id} is out of range (capacity {capacity})")]
    OutOfRange { id: i64, capacity: usize },

    /// Field/value pairing the evaluator cannot compare, e.g. `AGE` against
    /// a string literal. A conforming parser never produces one.
    #[error("unsupported comparison of {field} with {value}")]
    UnsupportedComparison { field: FieldId, value: Value },

    /// A bounded lock wait expired.
    #[error("timed out waiting for lock on record {id}")]
    LockTimeout { id: usize },

    /// UPDATE tried to store a value of the wrong type, or to change the id.
    #[error("cannot assign {value} to {field}")]
    InvalidAssignment { field: FieldId, value: Value },

    #[error("name is {len} bytes, limit is {limit}", limit = super::MAX_NAME_LEN)]
    NameTooLong { len: usize },
}
