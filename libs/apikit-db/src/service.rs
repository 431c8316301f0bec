//! Entity registry and the `get` pipeline.

use std::fmt;
use std::sync::Arc;

use apikit_security::{AccessLevel, CallerContext};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::clause::ClauseSet;
use crate::config::QueryConfig;
use crate::error::{ApiError, ApiResult};
use crate::executor::{Mode, accumulate, apply_output, count};
use crate::finalize::{GetResult, finalize};
use crate::hydrate::{HydrationStep, hydrate};
use crate::options::{OptionSchema, QueryOptions};
use crate::predicate::{PredicateCtx, PredicateRegistry, apply_filter, apply_search, id_in};
use crate::runner::QueryRunner;
use crate::scope::{AclPolicy, Scope};
use crate::value::{Fragment, Id};

/// Declaration of one queryable entity.
#[derive(Debug, Clone)]
pub struct EntityDef {
    name: String,
    table: String,
    alias: String,
    pk: String,
    ids_option: String,
    schema: OptionSchema,
    acl: AclPolicy,
    predicates: PredicateRegistry,
    hydration: Vec<Arc<dyn HydrationStep>>,
    base_where: Vec<Fragment>,
}

impl EntityDef {
    /// New entity over `table <alias>`; `<pk>s` becomes its id filter.
    #[must_use]
    pub fn new(name: &str, table: &str, alias: &str, pk: &str) -> Self {
        let ids_option = format!("{pk}s");
        Self {
            name: name.to_owned(),
            table: table.to_owned(),
            alias: alias.to_owned(),
            pk: pk.to_owned(),
            schema: OptionSchema::new().id_filter(&ids_option),
            predicates: PredicateRegistry::new().on(&ids_option, id_in(pk)),
            ids_option,
            acl: AclPolicy::public(),
            hydration: Vec::new(),
            base_where: Vec::new(),
        }
    }

    /// Replace the option schema. The id filter and registered `select*`
    /// options stay accepted.
    #[must_use]
    pub fn schema(mut self, schema: OptionSchema) -> Self {
        let mut schema = schema.id_filter(&self.ids_option);
        for step in &self.hydration {
            schema = schema.select(step.option());
        }
        self.schema = schema;
        self
    }

    #[must_use]
    pub fn acl(mut self, acl: AclPolicy) -> Self {
        self.acl = acl;
        self
    }

    /// Register a predicate contribution for option `key`.
    #[must_use]
    pub fn predicate<F>(mut self, key: &str, f: F) -> Self
    where
        F: Fn(&PredicateCtx<'_>, &mut ClauseSet) -> ApiResult<()> + Send + Sync + 'static,
    {
        self.predicates = self.predicates.on(key, f);
        self
    }

    /// Append a hydration step; its option becomes accepted.
    #[must_use]
    pub fn step(mut self, step: impl HydrationStep + 'static) -> Self {
        self.schema = std::mem::take(&mut self.schema).select(step.option());
        self.hydration.push(Arc::new(step));
        self
    }

    /// Condition applied to every query of the entity, e.g. a row type.
    #[must_use]
    pub fn base_where(mut self, predicate: impl Into<Fragment>) -> Self {
        self.base_where.push(predicate.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[must_use]
    pub fn pk(&self) -> &str {
        &self.pk
    }

    #[must_use]
    pub fn ids_option(&self) -> &str {
        &self.ids_option
    }

    #[must_use]
    pub fn option_schema(&self) -> &OptionSchema {
        &self.schema
    }

    #[must_use]
    pub fn acl_policy(&self) -> &AclPolicy {
        &self.acl
    }

    #[must_use]
    pub fn hydration(&self) -> &[Arc<dyn HydrationStep>] {
        &self.hydration
    }

    fn required_fields(&self, options: &QueryOptions) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for step in &self.hydration {
            if options.select(step.option()).is_none() {
                continue;
            }
            for field in step.required_fields() {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        fields
    }

    fn clauses(&self, caller: &CallerContext, options: &QueryOptions, scope: Option<Fragment>) -> ApiResult<ClauseSet> {
        let mut clauses = ClauseSet::new(&self.table, &self.alias);
        for predicate in &self.base_where {
            clauses.add_where(None, predicate.clone());
        }
        self.predicates
            .apply(&self.alias, options, caller, &mut clauses)?;
        apply_filter(&self.alias, options, &mut clauses);
        apply_search(&self.alias, options, &mut clauses);
        clauses.set_scope(scope);
        Ok(clauses)
    }
}

/// Registered entities plus the runner executing their statements.
pub struct Api {
    entities: IndexMap<String, EntityDef>,
    runner: Arc<dyn QueryRunner>,
    config: QueryConfig,
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .field("runner", &"<dyn QueryRunner>")
            .field("config", &self.config)
            .finish()
    }
}

impl Api {
    #[must_use]
    pub fn new<R: QueryRunner + 'static>(runner: R) -> Self {
        Self {
            entities: IndexMap::new(),
            runner: Arc::new(runner),
            config: QueryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an entity, replacing one registered under the same name.
    pub fn register(&mut self, entity: EntityDef) -> &mut Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// # Errors
    /// Returns a parameter error for unknown entity names.
    pub fn entity(&self, name: &str) -> ApiResult<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| ApiError::parameters(format!("Unknown entity \"{name}\".")))
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    #[must_use]
    pub fn runner(&self) -> &dyn QueryRunner {
        self.runner.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Read objects of `entity` visible to `caller`.
    ///
    /// # Errors
    /// Returns a parameter error for invalid options, or an internal/database
    /// error if a statement fails. Denied objects are simply absent.
    #[tracing::instrument(skip_all, fields(entity = entity, user = caller.user_id()))]
    pub async fn get(&self, caller: &CallerContext, entity: &str, options: &Value) -> ApiResult<GetResult> {
        let def = self.entity(entity)?;
        let mut opts = def.schema.normalize(options)?;
        if let (Some(max), Some(n)) = (self.config.max_limit_selects, opts.limit_selects) {
            opts.limit_selects = Some(n.min(max));
        }

        let mode = Mode::of(&opts);
        let level = AccessLevel::from_editable(opts.editable);
        let scope = match def
            .acl
            .scope(caller, &def.alias, &def.pk, level, opts.nopermissions)
        {
            Scope::Empty => {
                tracing::debug!("caller type cannot request editable objects");
                return Ok(GetResult::empty(mode, opts.preserve_keys));
            }
            Scope::Unrestricted => None,
            Scope::Restricted(predicate) => Some(predicate),
        };

        let mut clauses = def.clauses(caller, &opts, scope)?;
        let required = def.required_fields(&opts);
        let extras = apply_output(&mut clauses, &def.alias, &def.pk, &opts, &required, mode);
        let stmt = clauses.build();
        let rows = self.runner.fetch_all(&stmt).await?;

        match mode {
            Mode::Count => Ok(GetResult::Count(count(&rows)?)),
            Mode::GroupCount => Ok(GetResult::Grouped(rows)),
            Mode::List => {
                let mut set = accumulate(rows, &def.pk)?;
                hydrate(self, caller, def, &opts, &mut set).await?;
                Ok(finalize(set, &extras, opts.preserve_keys))
            }
        }
    }

    /// Fail unless every id is visible to `caller` at `level`.
    ///
    /// # Errors
    /// Returns the permission error when any object is missing or denied, so
    /// both cases look the same to the caller.
    pub async fn ensure_accessible(
        &self,
        caller: &CallerContext,
        entity: &str,
        ids: &[Id],
        level: AccessLevel,
    ) -> ApiResult<()> {
        let def = self.entity(entity)?;
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(());
        }

        let expected = u64::try_from(ids.len()).unwrap_or(u64::MAX);
        let mut options = Map::new();
        options.insert(def.ids_option.clone(), Value::from(ids));
        options.insert("countOutput".to_owned(), Value::Bool(true));
        options.insert(
            "editable".to_owned(),
            Value::Bool(level == AccessLevel::ReadWrite),
        );
        let found = self
            .get(caller, entity, &Value::Object(options))
            .await?
            .as_count()
            .unwrap_or_default();
        if found == expected {
            Ok(())
        } else {
            Err(ApiError::no_permissions())
        }
    }
}
