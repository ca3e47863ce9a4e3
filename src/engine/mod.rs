use std::{fmt, str::FromStr, time::Duration};
use tracing::{debug, info};

mod compare;
mod error;
mod executor;
mod storage;

pub use compare::{check_constraint, satisfies};
pub use error::EngineError;
pub use executor::{execute, execute_delete, execute_insert, execute_select, execute_update};
pub use storage::{ReadHandle, RecordStore, Slot, WriteHandle, DEFAULT_CAPACITY, MAX_ADDRESSABLE};

use crate::config::EngineConfig;

/// Longest record name accepted, in bytes.
pub const MAX_NAME_LEN: usize = 100;

/// Tolerance used when comparing heights for equality, so decimal literals
/// typed into a query still match the stored `f64`.
pub const HEIGHT_EPSILON: f64 = 1e-4;

/// One row of the single table.
///
/// `id` doubles as the slot position in the [`RecordStore`]; there is no
/// secondary index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub id: i32,
    pub age: i32,
    pub height: f64,
    pub name: String,
}

impl Record {
    pub fn new(id: i32, age: i32, height: f64, name: impl Into<String>) -> Self {
        Self {
            id,
            age,
            height,
            name: name.into(),
        }
    }

    /// Renders the record as the `id;age;height;name\n` line used in
    /// query results.
    pub fn to_line(&self) -> String {
        format!("{};{};{};{}\n", self.id, self.age, self.height, self.name)
    }
}

/// Columns of the table, named by the upper-case tokens clients use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldId {
    Id,
    Age,
    Height,
    Name,
}

impl FieldId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldId::Id => "ID",
            FieldId::Age => "AGE",
            FieldId::Height => "HEIGHT",
            FieldId::Name => "NAME",
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldId {
    type Err = String;

    /// Field tokens are matched case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ID" => Ok(FieldId::Id),
            "AGE" => Ok(FieldId::Age),
            "HEIGHT" => Ok(FieldId::Height),
            "NAME" => Ok(FieldId::Name),
            other => Err(format!("unknown field {other}")),
        }
    }
}

/// Comparison operators allowed in a WHERE clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparator {
    Lower,
    LowerOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparator::Lower => "<",
            Comparator::LowerOrEqual => "<=",
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::Equal => "==",
        })
    }
}

/// A literal taken from a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "'{v}'"),
        }
    }
}

/// Single-field predicate such as `AGE >= 18`.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub field: FieldId,
    pub comparator: Comparator,
    pub value: Value,
}

impl Constraint {
    pub fn new(field: FieldId, comparator: Comparator, value: Value) -> Self {
        Self {
            field,
            comparator,
            value,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.comparator, self.value)
    }
}

/// A decoded statement, ready to run against the store.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// `None` selects every live record.
    Select { constraint: Option<Constraint> },
    Insert { record: Record },
    Delete { constraint: Constraint },
    Update {
        field: FieldId,
        value: Value,
        constraint: Constraint,
    },
}

impl Query {
    /// Short statement name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Query::Select { .. } => "select",
            Query::Insert { .. } => "insert",
            Query::Delete { .. } => "delete",
            Query::Update { .. } => "update",
        }
    }
}

/// Owns the record store and runs queries against it.
///
/// The engine is the explicit context handed to the dispatcher and the
/// server; there is no process-global table. Dropping the last reference
/// frees every slot.
///
/// ```text
///   Dispatcher worker ──► Engine::execute ──► executor handler
///                                                 │
///                                   ┌─────────────┴─────────────┐
///                                   ▼                           ▼
///                             RecordStore                 satisfies()
///                     (one RwLock per slot)          (constraint check)
/// ```
pub struct Engine {
    store: RecordStore,
}

impl Engine {
    /// Creates an engine with an empty store of `capacity` slots and
    /// unbounded lock waits.
    pub fn new(capacity: usize) -> Self {
        Self::with_store(RecordStore::new(capacity))
    }

    pub fn with_store(store: RecordStore) -> Self {
        info!(capacity = store.capacity(), "record store opened");
        Self { store }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let store = match config.lock_timeout_ms {
            Some(ms) => RecordStore::with_lock_timeout(config.capacity, Duration::from_millis(ms)),
            None => RecordStore::new(config.capacity),
        };
        Self::with_store(store)
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Runs one query to completion and returns its textual result.
    pub fn execute(&self, query: &Query) -> Result<String, EngineError> {
        debug!(kind = query.kind(), "executing query");
        execute(&self.store, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_line_format() {
        let r = Record::new(2, 21, 180.23, "Joe Brown");
        assert_eq!(r.to_line(), "2;21;180.23;Joe Brown\n");
    }

    #[test]
    fn field_tokens_parse_case_insensitively() {
        assert_eq!("age".parse::<FieldId>(), Ok(FieldId::Age));
        assert_eq!("HEIGHT".parse::<FieldId>(), Ok(FieldId::Height));
        assert_eq!("Name".parse::<FieldId>(), Ok(FieldId::Name));
        assert!("income".parse::<FieldId>().is_err());
    }

    #[test]
    fn constraint_display() {
        let c = Constraint::new(FieldId::Age, Comparator::GreaterOrEqual, Value::Int(18));
        assert_eq!(c.to_string(), "AGE >= 18");
    }

    #[test]
    fn engine_from_config_uses_capacity() {
        let config = EngineConfig {
            capacity: 16,
            ..EngineConfig::default()
        };
        let engine = Engine::from_config(&config);
        assert_eq!(engine.store().capacity(), 16);
    }
}
