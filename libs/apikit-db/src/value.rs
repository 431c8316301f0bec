//! Bound values, SQL fragments and row decoding.

use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};

pub use apikit_security::Id;

use crate::error::{ApiError, ApiResult};

/// One result row, column name to JSON value.
pub type Row = Map<String, Value>;

/// Rows keyed by primary id, in fetch order.
pub type ResultSet = IndexMap<Id, Row>;

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Convert a scalar JSON value. Booleans bind as `0`/`1`.
    ///
    /// # Errors
    /// Arrays and objects are rejected with a parameter error.
    pub fn from_json(value: &Value) -> ApiResult<Self> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Int(i64::from(*b))),
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Int)
                .or_else(|| n.as_f64().map(SqlValue::Real))
                .ok_or_else(|| ApiError::parameters(format!("unsupported number \"{n}\""))),
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(ApiError::parameters(format!(
                "scalar value expected, got \"{value}\""
            ))),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "'{v}'"),
        }
    }
}

/// A piece of SQL text together with the values for its placeholders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment {
    sql: String,
    params: Vec<SqlValue>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// SQL text without placeholders.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// Always-false predicate.
    #[must_use]
    pub fn deny() -> Self {
        Self::raw("1=0")
    }

    /// `expr=?` for one value, `expr IN (?,…)` for several, `1=0` for none.
    #[must_use]
    pub fn in_list(expr: &str, values: Vec<SqlValue>) -> Self {
        match values.len() {
            0 => Self::deny(),
            1 => Self::new(format!("{expr}=?"), values),
            n => Self::new(format!("{expr} IN ({})", placeholders(n)), values),
        }
    }

    #[must_use]
    pub fn ids_in(expr: &str, ids: &[Id]) -> Self {
        Self::in_list(expr, ids.iter().copied().map(SqlValue::Int).collect())
    }

    /// Join parts with `op`, wrapping the result in parentheses when there is more than one.
    #[must_use]
    pub fn join(parts: Vec<Fragment>, op: &str) -> Self {
        if parts.len() == 1 {
            return parts.into_iter().next().unwrap_or_default();
        }
        let mut sql = String::from("(");
        let mut params = Vec::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                sql.push(' ');
                sql.push_str(op);
                sql.push(' ');
            }
            sql.push_str(&part.sql);
            params.extend(part.params);
        }
        sql.push(')');
        Self { sql, params }
    }

    #[must_use]
    pub fn any(parts: Vec<Fragment>) -> Self {
        Self::join(parts, "OR")
    }

    #[must_use]
    pub fn all(parts: Vec<Fragment>) -> Self {
        Self::join(parts, "AND")
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub(crate) fn append_to(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        sql.push_str(&self.sql);
        params.extend(self.params.iter().cloned());
    }
}

impl From<&str> for Fragment {
    fn from(value: &str) -> Self {
        Fragment::raw(value)
    }
}

impl From<String> for Fragment {
    fn from(value: String) -> Self {
        Fragment::raw(value)
    }
}

/// A fully rendered statement ready for execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)?;
        if !self.params.is_empty() {
            f.write_str(" -- [")?;
            for (i, p) in self.params.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{p}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Read an id out of a row field. Integers and numeric strings are accepted.
#[must_use]
pub fn id_of(value: &Value) -> Option<Id> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn bind_params<'q>(
    sql: &'q str,
    params: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params.iter().fold(sqlx::query(sql), |q, p| match p {
        SqlValue::Null => q.bind(None::<i64>),
        SqlValue::Int(v) => q.bind(*v),
        SqlValue::Real(v) => q.bind(*v),
        SqlValue::Text(v) => q.bind(v.as_str()),
    })
}

/// Decode a row by the runtime storage class of each value.
pub(crate) fn decode_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();
    for column in row.columns() {
        let i = column.ordinal();
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => Value::from(row.try_get::<i64, _>(i)?),
                "REAL" => serde_json::Number::from_f64(row.try_get::<f64, _>(i)?)
                    .map_or(Value::Null, Value::Number),
                "BLOB" => {
                    Value::String(String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(i)?).into_owned())
                }
                _ => Value::String(row.try_get::<String, _>(i)?),
            }
        };
        out.insert(column.name().to_owned(), value);
    }
    Ok(out)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_list_shapes() {
        assert_eq!(Fragment::ids_in("h.hostid", &[]).sql(), "1=0");
        assert_eq!(Fragment::ids_in("h.hostid", &[7]).sql(), "h.hostid=?");

        let many = Fragment::ids_in("h.hostid", &[1, 2, 3]);
        assert_eq!(many.sql(), "h.hostid IN (?,?,?)");
        assert_eq!(many.params(), &[SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]);
    }

    #[test]
    fn join_parenthesizes_and_keeps_param_order() {
        let f = Fragment::any(vec![
            Fragment::new("a=?", vec![SqlValue::Int(1)]),
            Fragment::new("b=?", vec!["x".into()]),
        ]);
        assert_eq!(f.sql(), "(a=? OR b=?)");
        assert_eq!(f.params(), &[SqlValue::Int(1), SqlValue::Text("x".to_owned())]);

        let single = Fragment::all(vec![Fragment::raw("c=1")]);
        assert_eq!(single.sql(), "c=1");
    }

    #[test]
    fn json_scalars_convert() {
        assert_eq!(SqlValue::from_json(&json!(true)).unwrap(), SqlValue::Int(1));
        assert_eq!(SqlValue::from_json(&json!("a")).unwrap(), SqlValue::Text("a".to_owned()));
        assert!(SqlValue::from_json(&json!(null)).unwrap().is_null());
        assert!(SqlValue::from_json(&json!([1])).is_err());
    }

    #[test]
    fn id_of_accepts_numeric_strings() {
        assert_eq!(id_of(&json!(5)), Some(5));
        assert_eq!(id_of(&json!("12")), Some(12));
        assert_eq!(id_of(&json!("x")), None);
        assert_eq!(id_of(&json!(null)), None);
    }

    #[test]
    fn statement_display_lists_params() {
        let stmt = Statement::new("SELECT 1 WHERE a=?", vec![SqlValue::Text("v".to_owned())]);
        assert_eq!(stmt.to_string(), "SELECT 1 WHERE a=? -- ['v']");
    }
}
