//! Result shaping after hydration.

use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::executor::Mode;
use crate::value::{ResultSet, Row};

/// Outcome of a `get` call.
#[derive(Debug, Clone, PartialEq)]
pub enum GetResult {
    /// Objects keyed by primary id (`preservekeys`).
    Map(ResultSet),
    List(Vec<Row>),
    Count(u64),
    /// `{<group field>…, rowscount}` rows.
    Grouped(Vec<Row>),
}

impl GetResult {
    /// The result of a call that cannot match anything.
    #[must_use]
    pub fn empty(mode: Mode, preserve_keys: bool) -> Self {
        match mode {
            Mode::Count => GetResult::Count(0),
            Mode::GroupCount => GetResult::Grouped(Vec::new()),
            Mode::List if preserve_keys => GetResult::Map(ResultSet::new()),
            Mode::List => GetResult::List(Vec::new()),
        }
    }

    /// Number of objects, or the counted value.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            GetResult::Map(rows) => rows.len(),
            GetResult::List(rows) | GetResult::Grouped(rows) => rows.len(),
            GetResult::Count(n) => usize::try_from(*n).unwrap_or(usize::MAX),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Errors
    /// Returns an internal error unless this is a keyed result.
    pub fn into_map(self) -> ApiResult<ResultSet> {
        match self {
            GetResult::Map(rows) => Ok(rows),
            other => Err(unexpected("keyed rows", &other)),
        }
    }

    /// Rows in order, whether keyed or not.
    ///
    /// # Errors
    /// Returns an internal error for count results.
    pub fn into_rows(self) -> ApiResult<Vec<Row>> {
        match self {
            GetResult::Map(rows) => Ok(rows.into_values().collect()),
            GetResult::List(rows) => Ok(rows),
            other => Err(unexpected("rows", &other)),
        }
    }

    /// # Errors
    /// Returns an internal error unless this is a grouped count.
    pub fn into_grouped(self) -> ApiResult<Vec<Row>> {
        match self {
            GetResult::Grouped(rows) => Ok(rows),
            other => Err(unexpected("grouped counts", &other)),
        }
    }

    #[must_use]
    pub fn as_count(&self) -> Option<u64> {
        match self {
            GetResult::Count(n) => Some(*n),
            _ => None,
        }
    }

    /// Wire shape: keyed object, array or number.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            GetResult::Map(rows) => Value::Object(
                rows.into_iter()
                    .map(|(id, row)| (id.to_string(), Value::Object(row)))
                    .collect::<Map<_, _>>(),
            ),
            GetResult::List(rows) | GetResult::Grouped(rows) => {
                Value::Array(rows.into_iter().map(Value::Object).collect())
            }
            GetResult::Count(n) => Value::from(n),
        }
    }
}

fn unexpected(expected: &str, got: &GetResult) -> ApiError {
    let kind = match got {
        GetResult::Map(_) => "keyed rows",
        GetResult::List(_) => "a list",
        GetResult::Count(_) => "a count",
        GetResult::Grouped(_) => "grouped counts",
    };
    ApiError::internal(format!("expected {expected}, got {kind}"))
}

/// Remove helper fields that were not requested.
pub fn strip_fields(rows: &mut ResultSet, fields: &[String]) {
    if fields.is_empty() {
        return;
    }
    for row in rows.values_mut() {
        for field in fields {
            row.shift_remove(field);
        }
    }
}

/// Strip helper fields and pick the result shape.
#[must_use]
pub fn finalize(mut rows: ResultSet, extras: &[String], preserve_keys: bool) -> GetResult {
    strip_fields(&mut rows, extras);
    if preserve_keys {
        GetResult::Map(rows)
    } else {
        GetResult::List(rows.into_values().collect())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> ResultSet {
        [
            (7, json!({"hostid": 7, "name": "b", "status": 0})),
            (3, json!({"hostid": 3, "name": "a", "status": 1})),
        ]
        .into_iter()
        .map(|(id, v)| (id, v.as_object().unwrap().clone()))
        .collect()
    }

    #[test]
    fn list_shape_is_zero_based_in_fetch_order() {
        let out = finalize(rows(), &["status".to_owned()], false).into_value();
        assert_eq!(out, json!([{"hostid": 7, "name": "b"}, {"hostid": 3, "name": "a"}]));
    }

    #[test]
    fn preserved_keys_hold_the_same_rows() {
        let keyed = finalize(rows(), &[], true);
        let listed = finalize(rows(), &[], false);
        assert_eq!(keyed.clone().into_rows().unwrap(), listed.into_rows().unwrap());
        assert_eq!(keyed.into_value()["3"]["name"], json!("a"));
    }

    #[test]
    fn keyed_wire_shape_keeps_fetch_and_column_order() {
        let mut set = ResultSet::new();
        for id in [10, 9] {
            set.insert(id, json!({"hostid": id, "status": 0, "name": "n"}).as_object().unwrap().clone());
        }
        let out = finalize(set, &["status".to_owned()], true).into_value();
        let out = out.as_object().unwrap();
        assert_eq!(out.keys().collect::<Vec<_>>(), ["10", "9"]);
        assert_eq!(out["10"].as_object().unwrap().keys().collect::<Vec<_>>(), ["hostid", "name"]);
    }

    #[test]
    fn empty_results_follow_mode() {
        assert_eq!(GetResult::empty(Mode::Count, false), GetResult::Count(0));
        assert_eq!(GetResult::empty(Mode::List, true), GetResult::Map(ResultSet::new()));
        assert!(GetResult::empty(Mode::GroupCount, true).is_empty());
    }

    #[test]
    fn wrong_shape_is_internal_error() {
        assert!(GetResult::Count(3).into_map().is_err());
    }
}
