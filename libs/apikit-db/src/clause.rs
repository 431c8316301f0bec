//! Keyed SQL clause buckets and their rendering into one statement.
//!
//! Every bucket is insertion-ordered and keyed by a stable string, so a join or
//! predicate contributed twice under the same key collapses into one entry that
//! keeps its original position. Anonymous `WHERE` entries always append.

use indexmap::IndexMap;

use crate::value::{Fragment, SqlValue, Statement};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WhereKey {
    Named(String),
    Anonymous(usize),
}

#[derive(Debug, Clone, Default)]
pub struct ClauseSet {
    select: IndexMap<String, String>,
    from: IndexMap<String, String>,
    left_join: IndexMap<String, Fragment>,
    where_: IndexMap<WhereKey, Fragment>,
    group: IndexMap<String, String>,
    order: IndexMap<String, String>,
    limit: Option<u64>,
    scope: Option<Fragment>,
    anonymous: usize,
}

impl ClauseSet {
    /// Start a clause set whose base table is `table` aliased as `alias`.
    #[must_use]
    pub fn new(table: &str, alias: &str) -> Self {
        let mut set = Self::default();
        set.add_from(table, format!("{table} {alias}"));
        set
    }

    pub fn add_select(&mut self, key: impl Into<String>, expr: impl Into<String>) -> &mut Self {
        self.select.insert(key.into(), expr.into());
        self
    }

    pub fn add_from(&mut self, key: impl Into<String>, table_expr: impl Into<String>) -> &mut Self {
        self.from.insert(key.into(), table_expr.into());
        self
    }

    /// Full join clause, e.g. `LEFT JOIN host_inventory hi ON hi.hostid=h.hostid`.
    pub fn add_left_join(&mut self, key: impl Into<String>, join: impl Into<Fragment>) -> &mut Self {
        self.left_join.insert(key.into(), join.into());
        self
    }

    /// Keyed predicates overwrite in place; `None` always appends.
    pub fn add_where(&mut self, key: Option<&str>, predicate: impl Into<Fragment>) -> &mut Self {
        let key = match key {
            Some(k) => WhereKey::Named(k.to_owned()),
            None => {
                self.anonymous += 1;
                WhereKey::Anonymous(self.anonymous)
            }
        };
        self.where_.insert(key, predicate.into());
        self
    }

    pub fn add_group(&mut self, key: impl Into<String>, expr: impl Into<String>) -> &mut Self {
        self.group.insert(key.into(), expr.into());
        self
    }

    pub fn add_order(&mut self, key: impl Into<String>, expr: impl Into<String>) -> &mut Self {
        self.order.insert(key.into(), expr.into());
        self
    }

    pub fn set_limit(&mut self, limit: Option<u64>) -> &mut Self {
        self.limit = limit;
        self
    }

    /// Permission predicate, conjoined last with the `WHERE` clause.
    pub fn set_scope(&mut self, scope: Option<Fragment>) -> &mut Self {
        self.scope = scope;
        self
    }

    pub fn clear_select(&mut self) -> &mut Self {
        self.select.clear();
        self
    }

    pub fn clear_order(&mut self) -> &mut Self {
        self.order.clear();
        self
    }

    /// Group entries as `(key, expr)` pairs, in registration order.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &str)> {
        self.group.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn has_select(&self, key: &str) -> bool {
        self.select.contains_key(key)
    }

    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Render the statement. Pure: repeated calls yield identical output.
    #[must_use]
    pub fn build(&self) -> Statement {
        let mut sql = String::from("SELECT ");
        let mut params: Vec<SqlValue> = Vec::new();

        if self.from.len() > 1 {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&join_values(self.select.values()));

        sql.push_str(" FROM ");
        let mut from = self.from.values();
        if let Some(base) = from.next() {
            sql.push_str(base);
        }
        for join in self.left_join.values() {
            sql.push(' ');
            join.append_to(&mut sql, &mut params);
        }
        for table in from {
            sql.push_str(", ");
            sql.push_str(table);
        }

        if !self.where_.is_empty() || self.scope.is_some() {
            sql.push_str(" WHERE ");
            for (i, predicate) in self.where_.values().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                predicate.append_to(&mut sql, &mut params);
            }
            if let Some(scope) = &self.scope {
                if !self.where_.is_empty() {
                    sql.push_str(" AND ");
                }
                sql.push('(');
                scope.append_to(&mut sql, &mut params);
                sql.push(')');
            }
        }

        if !self.group.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&join_values(self.group.values()));
        }
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&join_values(self.order.values()));
        }
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        Statement { sql, params }
    }
}

fn join_values<'a>(values: impl Iterator<Item = &'a String>) -> String {
    values.map(String::as_str).collect::<Vec<_>>().join(",")
}
