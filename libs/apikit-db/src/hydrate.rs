//! Related-object hydration.
//!
//! Each entity owns an ordered pipeline of [`HydrationStep`]s. A step runs only
//! when its `select*` option is present, issues one batched fetch of the target
//! entity through [`Api::get`] (so the target's permission scope applies) and
//! returns an [`Attachment`]. Steps load concurrently; attachments are applied
//! in pipeline order once all loads succeed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use apikit_security::CallerContext;
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::{ApiError, ApiResult};
use crate::options::{Output, QueryOptions};
use crate::relation::RelationMap;
use crate::service::{Api, EntityDef};
use crate::value::{Fragment, Id, ResultSet, Statement, id_of};

/// Values produced by one step, ready to be written onto parent rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub key: String,
    pub values: HashMap<Id, Value>,
    /// Written for parents without a value.
    pub default: Value,
}

impl Attachment {
    pub fn apply(mut self, rows: &mut ResultSet) {
        for (id, row) in rows.iter_mut() {
            let value = self
                .values
                .remove(id)
                .unwrap_or_else(|| self.default.clone());
            row.insert(self.key.clone(), value);
        }
    }
}

/// Inputs of a single load.
#[derive(Clone, Copy)]
pub struct LoadCtx<'a> {
    pub api: &'a Api,
    pub caller: &'a CallerContext,
    pub rows: &'a ResultSet,
    /// Output requested through the step's `select*` option.
    pub output: &'a Output,
    /// `limitSelects` of the parent call.
    pub limit: Option<usize>,
}

#[async_trait]
pub trait HydrationStep: Send + Sync + fmt::Debug {
    /// Option that enables the step, e.g. `selectHosts`.
    fn option(&self) -> &str;

    /// Parent row fields the step reads; added to the parent `SELECT` when missing.
    fn required_fields(&self) -> Vec<String> {
        Vec::new()
    }

    async fn load(&self, ctx: &LoadCtx<'_>) -> ApiResult<Attachment>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Where the parent-to-target association comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationSource {
    /// The parent row holds the target id.
    ParentColumn(String),
    /// A link table `table(parent_col, target_col)`.
    LinkTable {
        table: String,
        parent_col: String,
        target_col: String,
    },
    /// Target rows hold the parent id in this column.
    ChildColumn(String),
}

/// Generic step attaching objects of another registered entity.
#[derive(Debug, Clone)]
pub struct RelatedStep {
    option: String,
    key: String,
    target: String,
    cardinality: Cardinality,
    source: RelationSource,
    target_ids: Option<String>,
    by_parent: Option<(String, String)>,
    sort_field: Option<String>,
}

impl RelatedStep {
    fn new(option: &str, key: &str, target: &str, cardinality: Cardinality) -> Self {
        Self {
            option: option.to_owned(),
            key: key.to_owned(),
            target: target.to_owned(),
            cardinality,
            source: RelationSource::ChildColumn(String::new()),
            target_ids: None,
            by_parent: None,
            sort_field: None,
        }
    }

    /// A list of related objects under `key`.
    #[must_use]
    pub fn many(option: &str, key: &str, target: &str) -> Self {
        Self::new(option, key, target, Cardinality::Many)
    }

    /// A single related object under `key`.
    #[must_use]
    pub fn one(option: &str, key: &str, target: &str) -> Self {
        Self::new(option, key, target, Cardinality::One)
    }

    #[must_use]
    pub fn parent_column(mut self, column: &str) -> Self {
        self.source = RelationSource::ParentColumn(column.to_owned());
        self
    }

    #[must_use]
    pub fn through(mut self, table: &str, parent_col: &str, target_col: &str) -> Self {
        self.source = RelationSource::LinkTable {
            table: table.to_owned(),
            parent_col: parent_col.to_owned(),
            target_col: target_col.to_owned(),
        };
        self
    }

    /// Target rows carry the parent id in `fk`; requires [`RelatedStep::by_parent`].
    #[must_use]
    pub fn child_column(mut self, fk: &str) -> Self {
        self.source = RelationSource::ChildColumn(fk.to_owned());
        self
    }

    /// Option of the target selecting objects by their own ids.
    /// Defaults to the target's id option.
    #[must_use]
    pub fn target_ids(mut self, option: &str) -> Self {
        self.target_ids = Some(option.to_owned());
        self
    }

    /// Option of the target filtering by parent ids, and the field that carries
    /// the parent id in grouped counts.
    ///
    /// Link-table steps use it only for `"count"`; without it they count the
    /// visible target ids behind the links instead.
    #[must_use]
    pub fn by_parent(mut self, option: &str, field: &str) -> Self {
        self.by_parent = Some((option.to_owned(), field.to_owned()));
        self
    }

    /// Order related lists by a target field before `limitSelects` applies.
    #[must_use]
    pub fn sorted_by(mut self, field: &str) -> Self {
        self.sort_field = Some(field.to_owned());
        self
    }

    fn fetch_output(&self, output: &Output, target: &EntityDef, extra: Option<&str>) -> Value {
        match output {
            Output::Fields(fields) => {
                let mut fields = fields.clone();
                for f in std::iter::once(target.pk()).chain(extra) {
                    if !fields.iter().any(|x| x == f) {
                        fields.push(f.to_owned());
                    }
                }
                Value::from(fields)
            }
            Output::Extend | Output::Count => Value::from("extend"),
        }
    }

    async fn fetch(&self, ctx: &LoadCtx<'_>, mut options: Map<String, Value>) -> ApiResult<ResultSet> {
        options.insert("preservekeys".to_owned(), Value::Bool(true));
        if let Some(field) = &self.sort_field {
            options.insert("sortfield".to_owned(), Value::from(field.clone()));
        }
        ctx.api
            .get(ctx.caller, &self.target, &Value::Object(options))
            .await?
            .into_map()
    }

    async fn fetch_by_ids(
        &self,
        ctx: &LoadCtx<'_>,
        target: &EntityDef,
        ids: Vec<Id>,
        output: Value,
    ) -> ApiResult<ResultSet> {
        if ids.is_empty() {
            return Ok(ResultSet::new());
        }
        let option = self
            .target_ids
            .clone()
            .unwrap_or_else(|| target.ids_option().to_owned());
        let mut options = Map::new();
        options.insert(option, Value::from(ids));
        options.insert("output".to_owned(), output);
        self.fetch(ctx, options).await
    }

    /// Parent-to-target associations that do not require fetching the target.
    async fn relation(&self, ctx: &LoadCtx<'_>) -> ApiResult<Option<RelationMap>> {
        match &self.source {
            RelationSource::ParentColumn(column) => {
                let mut map = RelationMap::new();
                for (id, row) in ctx.rows {
                    map.add_parent(*id);
                    if let Some(related) = row.get(column).and_then(id_of) {
                        map.add_relation(*id, related);
                    }
                }
                Ok(Some(map))
            }
            RelationSource::LinkTable {
                table,
                parent_col,
                target_col,
            } => {
                let parents: Vec<Id> = ctx.rows.keys().copied().collect();
                let filter = Fragment::ids_in(parent_col, &parents);
                let stmt = Statement::new(
                    format!(
                        "SELECT {parent_col},{target_col} FROM {table} WHERE {}",
                        filter.sql()
                    ),
                    filter.params().to_vec(),
                );
                let links = ctx.api.runner().fetch_all(&stmt).await?;
                let mut map = RelationMap::from_rows(&links, parent_col, target_col);
                for id in parents {
                    map.add_parent(id);
                }
                Ok(Some(map))
            }
            RelationSource::ChildColumn(_) => Ok(None),
        }
    }

    async fn load_counts(&self, ctx: &LoadCtx<'_>, target: &EntityDef) -> ApiResult<Attachment> {
        let values = if let Some((option, field)) = &self.by_parent {
            let parents: Vec<Id> = ctx.rows.keys().copied().collect();
            let grouped = ctx
                .api
                .get(
                    ctx.caller,
                    &self.target,
                    &json!({
                        option.as_str(): parents,
                        "countOutput": true,
                        "groupCount": true,
                    }),
                )
                .await?
                .into_grouped()?;
            grouped
                .iter()
                .filter_map(|row| {
                    let parent = row.get(field).and_then(id_of)?;
                    Some((parent, row.get("rowscount").cloned().unwrap_or(Value::from(0))))
                })
                .collect()
        } else {
            let map = self.relation(ctx).await?.ok_or_else(|| {
                ApiError::internal(format!("{}: counting requires a parent filter", self.option))
            })?;
            let visible = self
                .fetch_by_ids(ctx, target, map.related_ids(), json!([target.pk()]))
                .await?;
            map.many_values(&visible, None, None)
                .into_iter()
                .map(|(id, list)| (id, Value::from(list.as_array().map_or(0, Vec::len))))
                .collect()
        };

        Ok(Attachment {
            key: self.key.clone(),
            values,
            default: Value::from(0),
        })
    }
}

#[async_trait]
impl HydrationStep for RelatedStep {
    fn option(&self) -> &str {
        &self.option
    }

    fn required_fields(&self) -> Vec<String> {
        match &self.source {
            RelationSource::ParentColumn(column) => vec![column.clone()],
            RelationSource::LinkTable { .. } | RelationSource::ChildColumn(_) => Vec::new(),
        }
    }

    async fn load(&self, ctx: &LoadCtx<'_>) -> ApiResult<Attachment> {
        let target = ctx.api.entity(&self.target)?;
        if *ctx.output == Output::Count {
            return self.load_counts(ctx, target).await;
        }

        let (map, mut objects, helper) = if let Some(map) = self.relation(ctx).await? {
            let output = self.fetch_output(ctx.output, target, None);
            let objects = self.fetch_by_ids(ctx, target, map.related_ids(), output).await?;
            (map, objects, None)
        } else {
            let RelationSource::ChildColumn(fk) = &self.source else {
                return Err(ApiError::internal(format!("{}: no relation source", self.option)));
            };
            let (option, _) = self.by_parent.as_ref().ok_or_else(|| {
                ApiError::internal(format!("{}: child relation requires a parent filter", self.option))
            })?;
            let parents: Vec<Id> = ctx.rows.keys().copied().collect();
            let mut options = Map::new();
            options.insert(option.clone(), Value::from(parents.clone()));
            options.insert(
                "output".to_owned(),
                self.fetch_output(ctx.output, target, Some(fk)),
            );
            let objects = self.fetch(ctx, options).await?;

            let mut map = RelationMap::new();
            for id in parents {
                map.add_parent(id);
            }
            for (id, row) in &objects {
                if let Some(parent) = row.get(fk).and_then(id_of) {
                    map.add_relation(parent, *id);
                }
            }
            let helper = (!ctx.output.includes(fk) && fk != target.pk()).then(|| fk.clone());
            (map, objects, helper)
        };

        if let Some(field) = helper {
            for row in objects.values_mut() {
                row.shift_remove(&field);
            }
        }

        let values = match self.cardinality {
            Cardinality::Many => map.many_values(&objects, ctx.limit, None),
            Cardinality::One => map.one_values(&objects),
        };
        Ok(Attachment {
            key: self.key.clone(),
            values,
            default: Value::Array(Vec::new()),
        })
    }
}

/// Run the steps whose `select*` option is present and attach their results.
pub(crate) async fn hydrate(
    api: &Api,
    caller: &CallerContext,
    entity: &EntityDef,
    options: &QueryOptions,
    rows: &mut ResultSet,
) -> ApiResult<()> {
    let limit = options
        .limit_selects
        .and_then(|n| usize::try_from(n).ok());
    let active: Vec<(&Arc<dyn HydrationStep>, &Output)> = entity
        .hydration()
        .iter()
        .filter_map(|step| options.select(step.option()).map(|output| (step, output)))
        .collect();
    if active.is_empty() || rows.is_empty() {
        return Ok(());
    }

    let parents: &ResultSet = rows;
    let loads = active.iter().map(|(step, output)| async move {
        let started = tokio::time::Instant::now();
        let ctx = LoadCtx {
            api,
            caller,
            rows: parents,
            output,
            limit,
        };
        let attachment = step.load(&ctx).await?;
        tracing::trace!(
            entity = entity.name(),
            step = step.option(),
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "hydration step loaded"
        );
        Ok::<_, ApiError>(attachment)
    });
    let attachments = futures::future::try_join_all(loads).await?;

    for attachment in attachments {
        attachment.apply(rows);
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn attachment_fills_defaults() {
        let mut rows: ResultSet = [(1, Map::new()), (2, Map::new())].into_iter().collect();
        let attachment = Attachment {
            key: "hosts".to_owned(),
            values: HashMap::from([(1, json!(4))]),
            default: json!(0),
        };
        attachment.apply(&mut rows);
        assert_eq!(rows[&1]["hosts"], json!(4));
        assert_eq!(rows[&2]["hosts"], json!(0));
    }

    #[test]
    fn required_fields_follow_source() {
        let one = RelatedStep::one("selectProxy", "proxy", "host").parent_column("proxy_hostid");
        assert_eq!(one.required_fields(), vec!["proxy_hostid".to_owned()]);

        let many = RelatedStep::many("selectHosts", "hosts", "host").through("hosts_groups", "groupid", "hostid");
        assert!(many.required_fields().is_empty());
    }
}
