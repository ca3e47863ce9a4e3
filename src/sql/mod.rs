use anyhow::{anyhow, bail, Result};
use sqlparser::ast::{
    BinaryOperator, Expr, Ident, Query as SqlQuery, Select, SelectItem, SetExpr, Statement, TableFactor,
    TableWithJoins, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::engine::{Comparator, Constraint, FieldId, Query, Record, Value};

/// Parses one SQL statement into a [`Query`].
///
/// The database has a single table with the columns `ID`, `AGE`, `HEIGHT`
/// and `NAME`, so the table name in `FROM`/`INTO`/`UPDATE` is accepted but
/// not interpreted. Column names are case-insensitive.
///
/// ## Supported SQL Statements
/// - `SELECT * [FROM t] [WHERE <col> <op> <literal>]`
/// - `INSERT INTO t [(cols)] VALUES (id, age, height, 'name')`
/// - `DELETE FROM t WHERE <col> <op> <literal>`
/// - `UPDATE t SET <col> = <literal> WHERE <col> <op> <literal>`
///
/// `<op>` is one of `<`, `<=`, `>`, `>=`, `=`. Literals are checked against
/// the column type here, so the engine never sees an `AGE = 'x'` style
/// comparison from this parser.
///
/// ## Example
/// ```rust
/// # fn main() -> anyhow::Result<()> {
/// use simple_db::engine::Query;
/// use simple_db::sql::parse_statement;
///
/// let q = parse_statement("SELECT * FROM people WHERE age >= 18;")?;
/// assert!(matches!(q, Query::Select { constraint: Some(_) }));
/// # Ok(())
/// # }
/// ```
pub fn parse_statement(sql: &str) -> Result<Query> {
    let dialect = GenericDialect {};
    let mut ast = Parser::parse_sql(&dialect, sql)?;
    if ast.len() != 1 {
        return Err(anyhow!("Only one statement at a time is supported"));
    }
    let stmt = ast.pop().ok_or_else(|| anyhow!("Empty statement"))?;

    match stmt {
        // SELECT * FROM people WHERE age >= 18
        Statement::Query(q) => convert_select(&q),

        // INSERT INTO people (id, age, height, name) VALUES (2, 21, 180.23, 'Joe Brown')
        Statement::Insert { columns, source, .. } => {
            let query = source.ok_or_else(|| anyhow!("INSERT requires a source"))?;
            convert_insert(&columns, &query)
        }

        // DELETE FROM people WHERE name = 'Joe Brown'
        Statement::Delete { from, selection, .. } => {
            single_table(&from)?;
            let selection = selection.ok_or_else(|| anyhow!("DELETE requires a WHERE clause"))?;
            Ok(Query::Delete {
                constraint: convert_constraint(&selection)?,
            })
        }

        // UPDATE people SET age = 0 WHERE age < 15
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => {
            single_table(std::slice::from_ref(&table))?;
            let [assignment] = assignments.as_slice() else {
                bail!("UPDATE supports exactly one assignment");
            };
            let field = column(
                assignment
                    .id
                    .last()
                    .ok_or_else(|| anyhow!("UPDATE assignment has no column"))?,
            )?;
            if field == FieldId::Id {
                bail!("ID cannot be updated");
            }
            let value = typed(field, literal(&assignment.value)?)?;
            let selection = selection.ok_or_else(|| anyhow!("UPDATE requires a WHERE clause"))?;
            Ok(Query::Update {
                field,
                value,
                constraint: convert_constraint(&selection)?,
            })
        }

        _ => Err(anyhow!("Unsupported statement")),
    }
}

fn convert_select(query: &SqlQuery) -> Result<Query> {
    let SetExpr::Select(select) = query.body.as_ref() else {
        bail!("Unsupported query body");
    };
    let Select {
        from,
        projection,
        selection,
        ..
    } = select.as_ref();

    single_table(from)?;
    if !matches!(projection.as_slice(), [SelectItem::Wildcard(_)]) {
        bail!("Only SELECT * is supported");
    }
    let constraint = selection.as_ref().map(convert_constraint).transpose()?;
    Ok(Query::Select { constraint })
}

fn convert_insert(columns: &[Ident], query: &SqlQuery) -> Result<Query> {
    let SetExpr::Values(values) = query.body.as_ref() else {
        bail!("INSERT supports VALUES only");
    };
    let [row] = values.rows.as_slice() else {
        bail!("INSERT takes exactly one row");
    };

    let order = if columns.is_empty() {
        vec![FieldId::Id, FieldId::Age, FieldId::Height, FieldId::Name]
    } else {
        columns.iter().map(column).collect::<Result<Vec<_>>>()?
    };
    if order.len() != row.len() {
        bail!("Column count mismatch");
    }

    let mut record = Record::default();
    let mut seen = Vec::with_capacity(order.len());
    for (&field, expr) in order.iter().zip(row) {
        if seen.contains(&field) {
            bail!("Column {field} given twice");
        }
        seen.push(field);
        match typed(field, literal(expr)?)? {
            Value::Int(v) if field == FieldId::Id => record.id = v,
            Value::Int(v) => record.age = v,
            Value::Float(v) => record.height = v,
            Value::Text(v) => record.name = v,
        }
    }
    if seen.len() != 4 {
        bail!("INSERT needs ID, AGE, HEIGHT and NAME");
    }
    Ok(Query::Insert { record })
}

/// Converts `<column> <op> <literal>` into a [`Constraint`].
///
/// Only one comparison is allowed; `AND`/`OR` are rejected.
fn convert_constraint(expr: &Expr) -> Result<Constraint> {
    match expr {
        Expr::Nested(inner) => convert_constraint(inner),
        Expr::BinaryOp { left, op, right } => {
            let comparator = match op {
                BinaryOperator::Lt => Comparator::Lower,
                BinaryOperator::LtEq => Comparator::LowerOrEqual,
                BinaryOperator::Gt => Comparator::Greater,
                BinaryOperator::GtEq => Comparator::GreaterOrEqual,
                BinaryOperator::Eq => Comparator::Equal,
                BinaryOperator::And | BinaryOperator::Or => {
                    bail!("Only a single comparison is supported in WHERE")
                }
                _ => bail!("Only <, <=, >, >= and = supported in WHERE"),
            };
            let field = match left.as_ref() {
                Expr::Identifier(id) => column(id)?,
                _ => bail!("Only <column> <op> <literal> supported"),
            };
            let value = typed(field, literal(right)?)?;
            Ok(Constraint::new(field, comparator, value))
        }
        _ => Err(anyhow!("Unsupported WHERE expression")),
    }
}

fn column(id: &Ident) -> Result<FieldId> {
    id.value.parse::<FieldId>().map_err(|e| anyhow!(e))
}

fn literal(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Value(SqlValue::Number(n, _)) => number(n),
        Expr::Value(SqlValue::SingleQuotedString(s)) => Ok(Value::Text(s.clone())),
        Expr::Nested(inner) => literal(inner),
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        } => literal(expr),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Value::Int(v) => Ok(Value::Int(-v)),
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Text(_) => bail!("Cannot negate a string"),
        },
        _ => Err(anyhow!("Unsupported literal")),
    }
}

fn number(n: &str) -> Result<Value> {
    if let Ok(v) = n.parse::<i32>() {
        return Ok(Value::Int(v));
    }
    Ok(Value::Float(n.parse::<f64>()?))
}

/// Checks a literal against the column type, widening integers for HEIGHT.
fn typed(field: FieldId, value: Value) -> Result<Value> {
    match (field, value) {
        (FieldId::Id | FieldId::Age, v @ Value::Int(_)) => Ok(v),
        (FieldId::Height, Value::Int(v)) => Ok(Value::Float(f64::from(v))),
        (FieldId::Height, v @ Value::Float(_)) => Ok(v),
        (FieldId::Name, v @ Value::Text(_)) => Ok(v),
        (field, v) => Err(anyhow!("{field} cannot hold {v}")),
    }
}

fn single_table(from: &[TableWithJoins]) -> Result<()> {
    if from.len() > 1 {
        bail!("Only single table statements are supported");
    }
    for table in from {
        if !table.joins.is_empty() {
            bail!("Joins are not supported");
        }
        if !matches!(table.relation, TableFactor::Table { .. }) {
            bail!("Unsupported FROM clause");
        }
    }
    Ok(())
}
