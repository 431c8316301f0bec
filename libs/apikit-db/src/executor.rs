//! Execution modes and result accumulation.

use crate::clause::ClauseSet;
use crate::error::{ApiError, ApiResult};
use crate::options::{Output, QueryOptions};
use crate::value::{ResultSet, Row, id_of};

/// Column holding counts in `COUNT` and `GROUP_COUNT` results.
pub const ROWSCOUNT: &str = "rowscount";

/// Shape of the main query, fixed before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    List,
    Count,
    GroupCount,
}

impl Mode {
    #[must_use]
    pub fn of(options: &QueryOptions) -> Self {
        match (options.count_output, options.group_count) {
            (false, _) => Mode::List,
            (true, false) => Mode::Count,
            (true, true) => Mode::GroupCount,
        }
    }
}

/// Fill the `SELECT`, `ORDER BY` and `LIMIT` parts for `mode`.
///
/// Returns the fields added to the list select only for internal use, which the
/// finalizer strips afterwards.
pub fn apply_output(
    clauses: &mut ClauseSet,
    alias: &str,
    pk: &str,
    options: &QueryOptions,
    required: &[String],
    mode: Mode,
) -> Vec<String> {
    let count = format!("COUNT(DISTINCT {alias}.{pk}) AS {ROWSCOUNT}");
    match mode {
        Mode::Count => {
            clauses.clear_select().clear_order().set_limit(None);
            clauses.add_select(ROWSCOUNT, count);
            Vec::new()
        }
        Mode::GroupCount => {
            let groups: Vec<(String, String)> = clauses
                .groups()
                .map(|(k, e)| (k.to_owned(), e.to_owned()))
                .collect();
            clauses.clear_select().clear_order().set_limit(options.limit);
            for (key, expr) in groups {
                clauses.add_select(key.clone(), format!("{expr} AS {key}"));
            }
            clauses.add_select(ROWSCOUNT, count);
            Vec::new()
        }
        Mode::List => {
            let mut extras = Vec::new();
            match &options.output {
                Output::Fields(fields) => {
                    clauses.add_select(pk, format!("{alias}.{pk}"));
                    for field in fields {
                        clauses.add_select(field.clone(), format!("{alias}.{field}"));
                    }
                    let helpers = required
                        .iter()
                        .map(String::as_str)
                        .chain(options.sort.iter().map(|(f, _)| f.as_str()));
                    for field in helpers {
                        if !clauses.has_select(field) {
                            clauses.add_select(field, format!("{alias}.{field}"));
                            extras.push(field.to_owned());
                        }
                    }
                }
                Output::Extend | Output::Count => {
                    clauses.add_select("*", format!("{alias}.*"));
                }
            }
            for (field, dir) in &options.sort {
                clauses.add_order(field.clone(), format!("{alias}.{field} {}", dir.as_sql()));
            }
            clauses.set_limit(options.limit);
            extras
        }
    }
}

/// Key list rows by primary id, keeping fetch order.
///
/// # Errors
/// Returns an internal error if a row lacks a usable primary id.
pub fn accumulate(rows: Vec<Row>, pk: &str) -> ApiResult<ResultSet> {
    let mut set = ResultSet::with_capacity(rows.len());
    for row in rows {
        let id = row
            .get(pk)
            .and_then(id_of)
            .ok_or_else(|| ApiError::internal(format!("row without primary key \"{pk}\"")))?;
        set.insert(id, row);
    }
    Ok(set)
}

/// Read the scalar of a `COUNT` query.
///
/// # Errors
/// Returns an internal error if the count column is missing.
pub fn count(rows: &[Row]) -> ApiResult<u64> {
    rows.first()
        .and_then(|row| row.get(ROWSCOUNT))
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| ApiError::internal("count query returned no rowscount"))
}
