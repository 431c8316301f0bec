//! Predicate contributions keyed by option name, plus the built-in
//! `filter` and `search` contributions shared by every entity.

use std::fmt;
use std::sync::Arc;

use apikit_security::CallerContext;
use indexmap::IndexMap;
use serde_json::Value;

use crate::clause::ClauseSet;
use crate::error::ApiResult;
use crate::options::{QueryOptions, SearchFlags};
use crate::value::{Fragment, Id, SqlValue};

/// What a contribution sees of the current call.
#[derive(Debug, Clone, Copy)]
pub struct PredicateCtx<'a> {
    /// Option that triggered the contribution.
    pub key: &'a str,
    pub alias: &'a str,
    pub options: &'a QueryOptions,
    pub caller: &'a CallerContext,
}

impl<'a> PredicateCtx<'a> {
    /// Ids passed for the triggering option; empty if it is not an id filter.
    #[must_use]
    pub fn ids(&self) -> &'a [Id] {
        self.options.ids(self.key).unwrap_or_default()
    }

    #[must_use]
    pub fn value(&self) -> Option<&'a Value> {
        self.options.extra(self.key)
    }

    /// Qualify a column of the entity table.
    #[must_use]
    pub fn column(&self, column: &str) -> String {
        format!("{}.{column}", self.alias)
    }
}

pub type PredicateFn = dyn Fn(&PredicateCtx<'_>, &mut ClauseSet) -> ApiResult<()> + Send + Sync;

/// Contributions of one entity, invoked in registration order for options that are set.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    entries: IndexMap<String, Arc<PredicateFn>>,
}

impl fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PredicateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` for option `key`, replacing an earlier registration.
    #[must_use]
    pub fn on<F>(mut self, key: &str, f: F) -> Self
    where
        F: Fn(&PredicateCtx<'_>, &mut ClauseSet) -> ApiResult<()> + Send + Sync + 'static,
    {
        self.entries.insert(key.to_owned(), Arc::new(f));
        self
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn apply(
        &self,
        alias: &str,
        options: &QueryOptions,
        caller: &CallerContext,
        clauses: &mut ClauseSet,
    ) -> ApiResult<()> {
        for (key, f) in &self.entries {
            if !options.is_set(key) {
                continue;
            }
            let ctx = PredicateCtx {
                key,
                alias,
                options,
                caller,
            };
            f(&ctx, clauses)?;
        }
        Ok(())
    }
}

/// `<alias>.<column> IN (ids)`; under `countOutput` + `groupCount` the column becomes a group field.
pub fn id_in(column: &str) -> impl Fn(&PredicateCtx<'_>, &mut ClauseSet) -> ApiResult<()> + Send + Sync + 'static {
    let column = column.to_owned();
    move |ctx, clauses| {
        let qualified = ctx.column(&column);
        clauses.add_where(Some(ctx.key), Fragment::ids_in(&qualified, ctx.ids()));
        if ctx.options.grouped_count() {
            clauses.add_group(column.clone(), qualified);
        }
        Ok(())
    }
}

/// Filter through a link table, e.g. hosts by group:
/// `linked_id_in("hosts_groups hg", "hg.hostid=h.hostid", "hg.groupid")`.
pub fn linked_id_in(
    table: &str,
    join: &str,
    filter_col: &str,
) -> impl Fn(&PredicateCtx<'_>, &mut ClauseSet) -> ApiResult<()> + Send + Sync + 'static {
    let table = table.to_owned();
    let join = join.to_owned();
    let filter_col = filter_col.to_owned();
    let group_key = filter_col
        .rsplit('.')
        .next()
        .unwrap_or(filter_col.as_str())
        .to_owned();
    move |ctx, clauses| {
        clauses.add_from(table.clone(), table.clone());
        clauses.add_where(Some(join.as_str()), join.as_str());
        clauses.add_where(Some(ctx.key), Fragment::ids_in(&filter_col, ctx.ids()));
        if ctx.options.grouped_count() {
            clauses.add_group(group_key.clone(), filter_col.clone());
        }
        Ok(())
    }
}

/// Exact-match filter; single values use `=`, several use `IN`.
pub(crate) fn apply_filter(alias: &str, options: &QueryOptions, clauses: &mut ClauseSet) {
    for (field, values) in &options.filter {
        let key = format!("filter:{field}");
        clauses.add_where(
            Some(key.as_str()),
            Fragment::in_list(&format!("{alias}.{field}"), values.clone()),
        );
    }
}

/// Case-insensitive substring search as one parenthesized predicate.
pub(crate) fn apply_search(alias: &str, options: &QueryOptions, clauses: &mut ClauseSet) {
    let flags = &options.search_flags;
    let fields: Vec<Fragment> = options
        .search
        .iter()
        .map(|(field, patterns)| {
            let op = if flags.exclude { "NOT LIKE" } else { "LIKE" };
            let likes = patterns
                .iter()
                .map(|p| {
                    Fragment::new(
                        format!("UPPER({alias}.{field}) {op} UPPER(?) ESCAPE '!'"),
                        vec![SqlValue::Text(like_pattern(p, flags))],
                    )
                })
                .collect();
            if flags.exclude {
                Fragment::all(likes)
            } else {
                Fragment::any(likes)
            }
        })
        .collect();

    if fields.is_empty() {
        return;
    }
    let joined = if flags.by_any {
        Fragment::any(fields)
    } else {
        Fragment::all(fields)
    };
    let parenthesized = if joined.sql().starts_with('(') {
        joined
    } else {
        Fragment::new(format!("({})", joined.sql()), joined.params().to_vec())
    };
    clauses.add_where(Some("search"), parenthesized);
}

fn like_pattern(value: &str, flags: &SearchFlags) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '!' | '%' | '_' => {
                escaped.push('!');
                escaped.push(ch);
            }
            '*' if flags.wildcards => escaped.push('%'),
            _ => escaped.push(ch),
        }
    }
    if flags.wildcards {
        if flags.start {
            escaped.push('%');
        }
        escaped
    } else if flags.start {
        format!("{escaped}%")
    } else {
        format!("%{escaped}%")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::options::OptionSchema;
    use serde_json::json;

    fn schema() -> OptionSchema {
        OptionSchema::new()
            .output_fields(&["hostid", "host", "name", "status"])
            .search_fields(&["host", "name"])
            .id_filter("hostids")
            .id_filter("groupids")
            .extra("monitored", Value::Null)
    }

    fn registry() -> PredicateRegistry {
        PredicateRegistry::new()
            .on("hostids", id_in("hostid"))
            .on(
                "groupids",
                linked_id_in("hosts_groups hg", "hg.hostid=h.hostid", "hg.groupid"),
            )
            .on("monitored", |ctx, clauses| {
                clauses.add_where(Some(ctx.key), ctx.column("status") + "=0");
                Ok(())
            })
    }

    fn render(options: &Value) -> String {
        let opts = schema().normalize(options).unwrap();
        let mut clauses = ClauseSet::new("hosts", "h");
        clauses.add_select("hostid", "h.hostid");
        registry()
            .apply("h", &opts, &CallerContext::super_admin(1), &mut clauses)
            .unwrap();
        apply_filter("h", &opts, &mut clauses);
        apply_search("h", &opts, &mut clauses);
        clauses.build().sql
    }

    #[test]
    fn contributions_run_only_for_set_options() {
        assert_eq!(render(&json!({})), "SELECT h.hostid FROM hosts h");
        assert_eq!(
            render(&json!({"monitored": true, "hostids": [1, 2]})),
            "SELECT h.hostid FROM hosts h WHERE h.hostid IN (?,?) AND h.status=0"
        );
    }

    #[test]
    fn linked_filter_joins_once_and_groups_under_group_count() {
        let sql = render(&json!({"groupids": 4, "countOutput": true, "groupCount": true}));
        assert_eq!(
            sql,
            "SELECT DISTINCT h.hostid FROM hosts h, hosts_groups hg \
             WHERE hg.hostid=h.hostid AND hg.groupid=? GROUP BY hg.groupid"
        );
    }

    #[test]
    fn filter_uses_equality_or_in() {
        assert_eq!(
            render(&json!({"filter": {"host": "a", "status": [0, 1]}})),
            "SELECT h.hostid FROM hosts h WHERE h.host=? AND h.status IN (?,?)"
        );
    }

    #[test]
    fn search_modifiers() {
        assert_eq!(
            render(&json!({"search": {"name": "web"}})),
            "SELECT h.hostid FROM hosts h WHERE (UPPER(h.name) LIKE UPPER(?) ESCAPE '!')"
        );
        assert_eq!(
            render(&json!({"search": {"host": "c", "name": ["a", "b"]}, "searchByAny": true})),
            "SELECT h.hostid FROM hosts h WHERE (UPPER(h.host) LIKE UPPER(?) ESCAPE '!' \
             OR (UPPER(h.name) LIKE UPPER(?) ESCAPE '!' OR UPPER(h.name) LIKE UPPER(?) ESCAPE '!'))"
        );
        assert!(
            render(&json!({"search": {"name": ["a", "b"]}, "excludeSearch": true}))
                .contains("NOT LIKE UPPER(?) ESCAPE '!' AND UPPER(h.name) NOT LIKE")
        );
    }

    #[test]
    fn like_patterns_escape_and_expand_wildcards() {
        let plain = SearchFlags::default();
        assert_eq!(like_pattern("50%_off!", &plain), "%50!%!_off!!%");

        let start = SearchFlags {
            start: true,
            ..SearchFlags::default()
        };
        assert_eq!(like_pattern("web", &start), "web%");

        let wild = SearchFlags {
            wildcards: true,
            ..SearchFlags::default()
        };
        assert_eq!(like_pattern("web*01", &wild), "web%01");
        assert_eq!(like_pattern("*db*", &wild), "%db%");
    }
}
