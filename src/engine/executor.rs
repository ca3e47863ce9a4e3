use tracing::{debug, info};

use super::{check_constraint, satisfies, Constraint, EngineError, FieldId, Query, Record, RecordStore, Value, MAX_NAME_LEN};

/// Runs `query` against `store` and returns the text sent back to the
/// requester.
///
/// Every handler holds at most one slot lock at a time, so handlers can
/// never deadlock against each other across slots.
pub fn execute(store: &RecordStore, query: &Query) -> Result<String, EngineError> {
    match query {
        Query::Select { constraint } => execute_select(store, constraint.as_ref()),
        Query::Insert { record } => execute_insert(store, record.clone()),
        Query::Delete { constraint } => execute_delete(store, constraint),
        Query::Update {
            field,
            value,
            constraint,
        } => execute_update(store, *field, value, constraint),
    }
}

/// Collects the lines of all live records matching `constraint` (all live
/// records when `None`), in ascending id order.
///
/// ## Pipeline
/// ```text
/// next_used_read ─► satisfies? ─► to_line ─► release ─► next slot
/// ```
/// Returns an empty string when nothing matches.
pub fn execute_select(store: &RecordStore, constraint: Option<&Constraint>) -> Result<String, EngineError> {
    if let Some(c) = constraint {
        check_constraint(c)?;
    }
    let mut out = String::new();
    let mut matched = 0usize;
    let mut cursor = None;

    while let Some(slot) = store.next_used_read(cursor)? {
        cursor = Some(slot.id());
        let keep = match constraint {
            None => true,
            Some(c) => satisfies(slot.record(), c)?,
        };
        if keep {
            out.push_str(&slot.record().to_line());
            matched += 1;
        }
        slot.release();
    }

    debug!(matched, bytes = out.len(), "select finished");
    Ok(out)
}

/// Writes `record` into the slot named by its id, replacing whatever was
/// there.
pub fn execute_insert(store: &RecordStore, record: Record) -> Result<String, EngineError> {
    check_name(&record.name)?;
    let mut slot = store.acquire_write(i64::from(record.id))?;
    slot.put(record)?;
    let line = slot.record().to_line();
    slot.release();

    debug!(line = line.trim_end(), "inserted");
    Ok(format!("Inserted {line}"))
}

/// Marks every live record matching `constraint` as unused.
pub fn execute_delete(store: &RecordStore, constraint: &Constraint) -> Result<String, EngineError> {
    check_constraint(constraint)?;
    let mut deleted = 0usize;
    let mut cursor = None;

    while let Some(mut slot) = store.next_used_write(cursor)? {
        cursor = Some(slot.id());
        if satisfies(slot.record(), constraint)? {
            slot.mark_deleted();
            deleted += 1;
        }
        slot.release();
    }

    info!(deleted, %constraint, "delete finished");
    Ok(format!("Deleted {deleted} records\n"))
}

/// Sets `field` to `value` on every live record matching `constraint`.
///
/// The assignment is validated before the scan starts, so a bad value
/// never leaves the table half-updated.
pub fn execute_update(
    store: &RecordStore,
    field: FieldId,
    value: &Value,
    constraint: &Constraint,
) -> Result<String, EngineError> {
    check_constraint(constraint)?;
    let assignment = Assignment::new(field, value)?;
    let mut updated = 0usize;
    let mut cursor = None;

    while let Some(mut slot) = store.next_used_write(cursor)? {
        cursor = Some(slot.id());
        if satisfies(slot.record(), constraint)? {
            assignment.apply(slot.record_mut());
            updated += 1;
        }
        slot.release();
    }

    info!(updated, %field, %constraint, "update finished");
    Ok(format!("Updated {updated} records\n"))
}

/// A type-checked `SET field = value`.
enum Assignment {
    Age(i32),
    Height(f64),
    Name(String),
}

impl Assignment {
    fn new(field: FieldId, value: &Value) -> Result<Self, EngineError> {
        match (field, value) {
            (FieldId::Age, Value::Int(v)) => Ok(Assignment::Age(*v)),
            (FieldId::Height, Value::Float(v)) => Ok(Assignment::Height(*v)),
            (FieldId::Height, Value::Int(v)) => Ok(Assignment::Height(f64::from(*v))),
            (FieldId::Name, Value::Text(v)) => {
                check_name(v)?;
                Ok(Assignment::Name(v.clone()))
            }
            // The id is the slot position and cannot be reassigned in place.
            _ => Err(EngineError::InvalidAssignment {
                field,
                value: value.clone(),
            }),
        }
    }

    fn apply(&self, record: &mut Record) {
        match self {
            Assignment::Age(v) => record.age = *v,
            Assignment::Height(v) => record.height = *v,
            Assignment::Name(v) => record.name.clone_from(v),
        }
    }
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::NameTooLong { len: name.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Comparator;

    fn age_at_least(n: i32) -> Constraint {
        Constraint::new(FieldId::Age, Comparator::GreaterOrEqual, Value::Int(n))
    }

    fn id_is(n: i32) -> Constraint {
        Constraint::new(FieldId::Id, Comparator::Equal, Value::Int(n))
    }

    fn seeded() -> RecordStore {
        let store = RecordStore::new(16);
        execute_insert(&store, Record::new(0, 10, 1.20, "Ann")).unwrap();
        execute_insert(&store, Record::new(1, 18, 1.75, "Bob")).unwrap();
        execute_insert(&store, Record::new(2, 25, 1.80, "Cid")).unwrap();
        store
    }

    #[test]
    fn select_filters_in_id_order() {
        let store = seeded();
        let out = execute_select(&store, Some(&age_at_least(18))).unwrap();
        assert_eq!(out, "1;18;1.75;Bob\n2;25;1.8;Cid\n");
    }

    #[test]
    fn select_all_and_empty() {
        let store = seeded();
        assert_eq!(execute_select(&store, None).unwrap().lines().count(), 3);
        assert_eq!(execute_select(&store, Some(&age_at_least(99))).unwrap(), "");
        assert_eq!(execute_select(&RecordStore::new(4), None).unwrap(), "");
    }

    #[test]
    fn insert_echoes_and_replaces() {
        let store = seeded();
        let out = execute_insert(&store, Record::new(1, 40, 1.9, "Bea")).unwrap();
        assert_eq!(out, "Inserted 1;40;1.9;Bea\n");
        assert_eq!(
            execute_select(&store, Some(&id_is(1))).unwrap(),
            "1;40;1.9;Bea\n"
        );
    }

    #[test]
    fn insert_out_of_range() {
        let store = RecordStore::new(16);
        let err = execute_insert(&store, Record::new(16, 1, 1.0, "x")).unwrap_err();
        assert_eq!(err, EngineError::OutOfRange { id: 16, capacity: 16 });
        assert!(execute_insert(&store, Record::new(15, 1, 1.0, "x")).is_ok());
        assert!(execute_insert(&store, Record::new(-3, 1, 1.0, "x")).is_err());
    }

    #[test]
    fn insert_rejects_long_name() {
        let store = RecordStore::new(4);
        let name = "n".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            execute_insert(&store, Record::new(0, 1, 1.0, name)),
            Err(EngineError::NameTooLong { len: 101 })
        );
        assert_eq!(store.live_count().unwrap(), 0);
    }

    #[test]
    fn delete_hides_matching_records() {
        let store = seeded();
        assert_eq!(
            execute_delete(&store, &age_at_least(18)).unwrap(),
            "Deleted 2 records\n"
        );
        assert_eq!(execute_select(&store, None).unwrap(), "0;10;1.2;Ann\n");
        assert_eq!(
            execute_delete(&store, &age_at_least(18)).unwrap(),
            "Deleted 0 records\n"
        );
    }

    #[test]
    fn update_assigns_matching_records() {
        let store = seeded();
        let out = execute_update(&store, FieldId::Name, &Value::Text("Adult".into()), &age_at_least(18)).unwrap();
        assert_eq!(out, "Updated 2 records\n");
        assert_eq!(
            execute_select(&store, None).unwrap(),
            "0;10;1.2;Ann\n1;18;1.75;Adult\n2;25;1.8;Adult\n"
        );
    }

    #[test]
    fn update_height_with_integer_literal() {
        let store = seeded();
        execute_update(&store, FieldId::Height, &Value::Int(2), &id_is(0)).unwrap();
        assert_eq!(execute_select(&store, Some(&id_is(0))).unwrap(), "0;10;2;Ann\n");
    }

    #[test]
    fn update_rejects_bad_assignment_before_touching_rows() {
        let store = seeded();
        let err = execute_update(&store, FieldId::Age, &Value::Text("x".into()), &age_at_least(0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAssignment { field: FieldId::Age, .. }));
        let err = execute_update(&store, FieldId::Id, &Value::Int(7), &age_at_least(0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAssignment { field: FieldId::Id, .. }));
        assert_eq!(execute_select(&store, None).unwrap().lines().count(), 3);
    }

    #[test]
    fn bad_constraint_fails_and_releases_locks() {
        let store = seeded();
        let bad = Constraint::new(FieldId::Age, Comparator::Equal, Value::Text("x".into()));
        assert!(execute_delete(&store, &bad).is_err());
        // Every slot must be lockable again after the early return.
        for id in 0..3 {
            assert!(store.acquire_write(id).is_ok());
        }
    }

    #[test]
    fn malformed_constraint_fails_on_empty_table() {
        let store = RecordStore::new(4);
        let bad = Constraint::new(FieldId::Name, Comparator::Equal, Value::Int(3));
        let expected = EngineError::UnsupportedComparison {
            field: FieldId::Name,
            value: Value::Int(3),
        };

        assert_eq!(execute_select(&store, Some(&bad)), Err(expected.clone()));
        assert_eq!(execute_delete(&store, &bad), Err(expected.clone()));
        assert_eq!(
            execute_update(&store, FieldId::Age, &Value::Int(1), &bad),
            Err(expected.clone())
        );

        // Same answer once every record has been deleted again.
        execute_insert(&store, Record::new(1, 5, 1.0, "gone")).unwrap();
        execute_delete(&store, &id_is(1)).unwrap();
        assert_eq!(execute_delete(&store, &bad), Err(expected));
    }

    #[test]
    fn execute_dispatches_by_kind() {
        let store = RecordStore::new(4);
        let insert = Query::Insert {
            record: Record::new(3, 30, 1.5, "Dee"),
        };
        assert_eq!(execute(&store, &insert).unwrap(), "Inserted 3;30;1.5;Dee\n");
        let select = Query::Select { constraint: None };
        assert_eq!(execute(&store, &select).unwrap(), "3;30;1.5;Dee\n");
    }
}
