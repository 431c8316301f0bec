//! Persistence helpers used by create/update paths.
//!
//! All helpers take a connection borrowed from an open transaction
//! (`&mut **tx` inside [`DbHandle::with_tx`](crate::DbHandle::with_tx)).
//! Table and column names are checked against a strict identifier pattern;
//! values are always bound.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use sqlx::SqliteConnection;

use crate::error::{ApiError, ApiResult};
use crate::runner::execute;
use crate::value::{Fragment, Id, Row, SqlValue, Statement, id_of, placeholders};

#[allow(clippy::expect_used)] // literal pattern
static IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex should not panic")
});

fn ident(name: &str) -> ApiResult<&str> {
    if IDENT.is_match(name) {
        Ok(name)
    } else {
        Err(ApiError::internal(format!("invalid SQL identifier \"{name}\"")))
    }
}

fn bound(row: &Row) -> ApiResult<(Vec<&str>, Vec<SqlValue>)> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (column, value) in row {
        columns.push(ident(column)?);
        values.push(SqlValue::from_json(value)?);
    }
    Ok((columns, values))
}

/// Insert rows one by one and return the generated ids in input order.
///
/// # Errors
/// Returns a parameter error for non-scalar values, or the driver error.
pub async fn insert(conn: &mut SqliteConnection, table: &str, pk: &str, rows: &[Row]) -> ApiResult<Vec<Id>> {
    let table = ident(table)?;
    ident(pk)?;
    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        let (columns, values) = bound(row)?;
        let stmt = if columns.is_empty() {
            Statement::new(format!("INSERT INTO {table} DEFAULT VALUES"), Vec::new())
        } else {
            Statement::new(
                format!(
                    "INSERT INTO {table} ({}) VALUES ({})",
                    columns.join(","),
                    placeholders(values.len())
                ),
                values,
            )
        };
        let done = execute(&mut *conn, &stmt).await?;
        ids.push(done.last_insert_rowid());
    }
    tracing::debug!(table, count = ids.len(), "rows inserted");
    Ok(ids)
}

/// One `UPDATE`: new `values` for rows matching every `where` pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub values: Row,
    pub r#where: Row,
}

/// Apply updates in order. Updates without values are skipped.
///
/// # Errors
/// Returns a parameter error for an update without conditions, or the driver error.
pub async fn update(conn: &mut SqliteConnection, table: &str, updates: &[Update]) -> ApiResult<u64> {
    let table = ident(table)?;
    let mut affected = 0;
    for upd in updates {
        if upd.r#where.is_empty() {
            return Err(ApiError::parameters(format!(
                "Cannot perform update statement on table \"{table}\" without where condition."
            )));
        }
        if upd.values.is_empty() {
            continue;
        }
        let (columns, mut params) = bound(&upd.values)?;
        let set = columns
            .iter()
            .map(|c| format!("{c}=?"))
            .collect::<Vec<_>>()
            .join(",");
        let conditions = upd
            .r#where
            .iter()
            .map(|(column, value)| match value {
                Value::Array(values) => Ok(Fragment::in_list(
                    ident(column)?,
                    values.iter().map(SqlValue::from_json).collect::<ApiResult<_>>()?,
                )),
                scalar => Ok(Fragment::in_list(ident(column)?, vec![SqlValue::from_json(scalar)?])),
            })
            .collect::<ApiResult<Vec<_>>>()?;
        let predicate = Fragment::all(conditions);
        params.extend_from_slice(predicate.params());

        let stmt = Statement::new(format!("UPDATE {table} SET {set} WHERE {}", predicate.sql()), params);
        affected += execute(&mut *conn, &stmt).await?.rows_affected();
    }
    Ok(affected)
}

/// Delete rows whose `field` is one of `ids`; no statement for an empty list.
///
/// # Errors
/// Returns the driver error.
pub async fn delete(conn: &mut SqliteConnection, table: &str, field: &str, ids: &[Id]) -> ApiResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let predicate = Fragment::ids_in(ident(field)?, ids);
    let stmt = Statement::new(
        format!("DELETE FROM {} WHERE {}", ident(table)?, predicate.sql()),
        predicate.params().to_vec(),
    );
    Ok(execute(conn, &stmt).await?.rows_affected())
}

/// Reconcile stored child rows with the desired set.
///
/// Rows in `new` without `pk` are inserted, rows with a known `pk` are updated
/// with the fields that differ, and `old` rows absent from `new` are deleted.
/// Unchanged rows are not touched. Returns `new` with generated ids filled in.
///
/// # Errors
/// Returns a parameter error if a `new` row refers to an id not in `old`, or the
/// driver error.
pub async fn replace(
    conn: &mut SqliteConnection,
    table: &str,
    pk: &str,
    old: &[Row],
    new: Vec<Row>,
) -> ApiResult<Vec<Row>> {
    let old_by_id: HashMap<Id, &Row> = old
        .iter()
        .filter_map(|row| row.get(pk).and_then(id_of).map(|id| (id, row)))
        .collect();

    let mut kept: Vec<Id> = Vec::new();
    let mut updates = Vec::new();
    let mut inserts = Vec::new();
    for (n, row) in new.iter().enumerate() {
        let Some(id) = row.get(pk).and_then(id_of) else {
            inserts.push(n);
            continue;
        };
        let stored = old_by_id.get(&id).ok_or_else(|| {
            ApiError::parameters(format!("Cannot update \"{table}\" row {id}: it does not exist."))
        })?;
        kept.push(id);
        let changed: Row = row
            .iter()
            .filter(|(field, value)| field.as_str() != pk && stored.get(field.as_str()) != Some(*value))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        if !changed.is_empty() {
            let mut cond = Row::new();
            cond.insert(pk.to_owned(), Value::from(id));
            updates.push(Update {
                values: changed,
                r#where: cond,
            });
        }
    }

    let removed: Vec<Id> = old_by_id
        .keys()
        .copied()
        .filter(|id| !kept.contains(id))
        .collect();
    delete(&mut *conn, table, pk, &removed).await?;
    update(&mut *conn, table, &updates).await?;

    let to_insert: Vec<Row> = inserts.iter().map(|&n| new[n].clone()).collect();
    let ids = insert(&mut *conn, table, pk, &to_insert).await?;

    let mut result = new;
    for (n, id) in inserts.into_iter().zip(ids) {
        result[n].insert(pk.to_owned(), Value::from(id));
    }
    Ok(result)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::runner::fetch_rows;
    use serde_json::json;
    use sqlx::Connection;

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    async fn conn() -> SqliteConnection {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::raw_sql(
            "CREATE TABLE host_tag (hosttagid INTEGER PRIMARY KEY AUTOINCREMENT, hostid INTEGER NOT NULL, tag TEXT NOT NULL, value TEXT NOT NULL DEFAULT '')",
        )
        .execute(&mut conn)
        .await
        .unwrap();
        conn
    }

    async fn tags(conn: &mut SqliteConnection) -> Vec<Value> {
        fetch_rows(
            conn,
            &Statement::new("SELECT hosttagid,tag,value FROM host_tag ORDER BY hosttagid", Vec::new()),
        )
        .await
        .unwrap()
        .into_iter()
        .map(Value::Object)
        .collect()
    }

    #[test]
    fn identifiers_are_checked() {
        assert!(ident("host_tag").is_ok());
        assert!(ident("host tag; DROP").is_err());
        assert!(ident("1x").is_err());
    }

    #[tokio::test]
    async fn insert_returns_ids_in_order() {
        let mut conn = conn().await;
        let ids = insert(
            &mut conn,
            "host_tag",
            "hosttagid",
            &[
                row(json!({"hostid": 1, "tag": "a"})),
                row(json!({"hostid": 1, "tag": "b", "value": "x"})),
            ],
        )
        .await
        .unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn update_requires_condition() {
        let mut conn = conn().await;
        let err = update(
            &mut conn,
            "host_tag",
            &[Update {
                values: row(json!({"tag": "x"})),
                r#where: Row::new(),
            }],
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), apikit_errors::ErrorCode::Parameters);
    }

    #[tokio::test]
    async fn delete_with_no_ids_is_a_noop() {
        let mut conn = conn().await;
        assert_eq!(delete(&mut conn, "host_tag", "hostid", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replace_applies_the_diff() {
        let mut conn = conn().await;
        insert(
            &mut conn,
            "host_tag",
            "hosttagid",
            &[
                row(json!({"hostid": 1, "tag": "keep"})),
                row(json!({"hostid": 1, "tag": "change"})),
                row(json!({"hostid": 1, "tag": "drop"})),
            ],
        )
        .await
        .unwrap();
        let old = vec![
            row(json!({"hosttagid": 1, "hostid": 1, "tag": "keep", "value": ""})),
            row(json!({"hosttagid": 2, "hostid": 1, "tag": "change", "value": ""})),
            row(json!({"hosttagid": 3, "hostid": 1, "tag": "drop", "value": ""})),
        ];
        let new = vec![
            row(json!({"hosttagid": 1, "hostid": 1, "tag": "keep", "value": ""})),
            row(json!({"hosttagid": 2, "hostid": 1, "tag": "change", "value": "v2"})),
            row(json!({"hostid": 1, "tag": "added", "value": ""})),
        ];

        let out = replace(&mut conn, "host_tag", "hosttagid", &old, new).await.unwrap();
        assert_eq!(out[2]["hosttagid"], json!(4));
        assert_eq!(
            tags(&mut conn).await,
            vec![
                json!({"hosttagid": 1, "tag": "keep", "value": ""}),
                json!({"hosttagid": 2, "tag": "change", "value": "v2"}),
                json!({"hosttagid": 4, "tag": "added", "value": ""}),
            ]
        );
    }

    #[tokio::test]
    async fn replace_rejects_foreign_ids() {
        let mut conn = conn().await;
        let err = replace(
            &mut conn,
            "host_tag",
            "hosttagid",
            &[],
            vec![row(json!({"hosttagid": 9, "tag": "x"}))],
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), apikit_errors::ErrorCode::Parameters);
    }
}
