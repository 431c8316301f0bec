//! Option normalization: a loosely-typed JSON option bag in, typed [`QueryOptions`] out.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::value::{Id, SqlValue, id_of};

const OUTPUT: &str = "output";
const FILTER: &str = "filter";
const SEARCH: &str = "search";
const SEARCH_BY_ANY: &str = "searchByAny";
const START_SEARCH: &str = "startSearch";
const EXCLUDE_SEARCH: &str = "excludeSearch";
const SEARCH_WILDCARDS: &str = "searchWildcardsEnabled";
const COUNT_OUTPUT: &str = "countOutput";
const GROUP_COUNT: &str = "groupCount";
const PRESERVE_KEYS: &str = "preservekeys";
const EDITABLE: &str = "editable";
const NOPERMISSIONS: &str = "nopermissions";
const SORT_FIELD: &str = "sortfield";
const SORT_ORDER: &str = "sortorder";
const LIMIT: &str = "limit";
const LIMIT_SELECTS: &str = "limitSelects";

/// Requested shape of returned objects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Output {
    /// All columns of the entity.
    #[default]
    Extend,
    /// Only the number of objects.
    Count,
    Fields(Vec<String>),
}

impl Output {
    fn parse(path: &str, value: &Value) -> ApiResult<Self> {
        match value {
            Value::String(s) if s == "extend" => Ok(Output::Extend),
            Value::String(s) if s == "count" => Ok(Output::Count),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    item.as_str().map(str::to_owned).ok_or_else(|| {
                        ApiError::parameters(format!(
                            "Invalid parameter \"{path}/{}\": a character string is expected.",
                            i + 1
                        ))
                    })
                })
                .collect::<ApiResult<Vec<_>>>()
                .map(Output::Fields),
            _ => Err(ApiError::parameters(format!(
                "Invalid parameter \"{path}\": value must be \"extend\", \"count\" or an array of field names."
            ))),
        }
    }

    /// Whether the caller asked for `field`.
    #[must_use]
    pub fn includes(&self, field: &str) -> bool {
        match self {
            Output::Extend => true,
            Output::Count => false,
            Output::Fields(fields) => fields.iter().any(|f| f == field),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Output::Extend => Value::from("extend"),
            Output::Count => Value::from("count"),
            Output::Fields(fields) => Value::from(fields.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }

    fn parse(path: &str, value: &Value) -> ApiResult<Self> {
        match value.as_str() {
            Some("ASC") => Ok(SortDir::Asc),
            Some("DESC") => Ok(SortDir::Desc),
            _ => Err(ApiError::parameters(format!(
                "Invalid parameter \"{path}\": value must be one of \"ASC\", \"DESC\"."
            ))),
        }
    }
}

/// Modifiers of the `search` option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct SearchFlags {
    pub by_any: bool,
    pub start: bool,
    pub exclude: bool,
    pub wildcards: bool,
}

/// Normalized options of one `get` call.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct QueryOptions {
    pub ids: IndexMap<String, Vec<Id>>,
    pub filter: IndexMap<String, Vec<SqlValue>>,
    pub search: IndexMap<String, Vec<String>>,
    pub search_flags: SearchFlags,
    pub output: Output,
    pub selects: IndexMap<String, Output>,
    pub count_output: bool,
    pub group_count: bool,
    pub preserve_keys: bool,
    pub editable: bool,
    pub nopermissions: bool,
    pub sort: Vec<(String, SortDir)>,
    pub limit: Option<u64>,
    pub limit_selects: Option<u64>,
    pub extra: IndexMap<String, Value>,
}

impl QueryOptions {
    /// Ids given for an id-filter option, if it was passed.
    #[must_use]
    pub fn ids(&self, key: &str) -> Option<&[Id]> {
        self.ids.get(key).map(Vec::as_slice)
    }

    /// Value of an entity-declared option, `None` when unset or null.
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key).filter(|v| !v.is_null())
    }

    /// Whether an id filter or a declared option carries a value.
    #[must_use]
    pub fn is_set(&self, key: &str) -> bool {
        self.ids.contains_key(key) || self.extra(key).is_some()
    }

    /// `groupCount` only takes effect together with `countOutput`.
    #[must_use]
    pub fn grouped_count(&self) -> bool {
        self.count_output && self.group_count
    }

    /// The output requested for a `select*` option, if present.
    #[must_use]
    pub fn select(&self, key: &str) -> Option<&Output> {
        self.selects.get(key)
    }
}

/// Per-entity declaration of accepted options and field whitelists.
#[derive(Debug, Clone, Default)]
pub struct OptionSchema {
    id_filters: Vec<String>,
    selects: Vec<String>,
    extras: IndexMap<String, Value>,
    output_fields: Vec<String>,
    filter_fields: Vec<String>,
    search_fields: Vec<String>,
    sort_fields: Vec<String>,
    default_output: Output,
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| (*f).to_owned()).collect()
}

impl OptionSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns that may be requested through `output`.
    #[must_use]
    pub fn output_fields(mut self, fields: &[&str]) -> Self {
        self.output_fields = owned(fields);
        self
    }

    /// Columns accepted by `filter`; defaults to the output fields.
    #[must_use]
    pub fn filter_fields(mut self, fields: &[&str]) -> Self {
        self.filter_fields = owned(fields);
        self
    }

    #[must_use]
    pub fn search_fields(mut self, fields: &[&str]) -> Self {
        self.search_fields = owned(fields);
        self
    }

    #[must_use]
    pub fn sort_fields(mut self, fields: &[&str]) -> Self {
        self.sort_fields = owned(fields);
        self
    }

    #[must_use]
    pub fn id_filter(mut self, key: &str) -> Self {
        if !self.id_filters.iter().any(|k| k == key) {
            self.id_filters.push(key.to_owned());
        }
        self
    }

    #[must_use]
    pub fn select(mut self, key: &str) -> Self {
        if !self.selects.iter().any(|k| k == key) {
            self.selects.push(key.to_owned());
        }
        self
    }

    /// Entity-specific option with its default value.
    #[must_use]
    pub fn extra(mut self, key: &str, default: Value) -> Self {
        self.extras.insert(key.to_owned(), default);
        self
    }

    #[must_use]
    pub fn default_output(mut self, output: Output) -> Self {
        self.default_output = output;
        self
    }

    #[must_use]
    pub fn output_field_list(&self) -> &[String] {
        &self.output_fields
    }

    #[must_use]
    pub fn has_output_field(&self, field: &str) -> bool {
        self.output_fields.iter().any(|f| f == field)
    }

    fn filter_whitelist(&self) -> &[String] {
        if self.filter_fields.is_empty() {
            &self.output_fields
        } else {
            &self.filter_fields
        }
    }

    fn is_known(&self, key: &str) -> bool {
        matches!(
            key,
            OUTPUT
                | FILTER
                | SEARCH
                | SEARCH_BY_ANY
                | START_SEARCH
                | EXCLUDE_SEARCH
                | SEARCH_WILDCARDS
                | COUNT_OUTPUT
                | GROUP_COUNT
                | PRESERVE_KEYS
                | EDITABLE
                | NOPERMISSIONS
                | SORT_FIELD
                | SORT_ORDER
                | LIMIT
                | LIMIT_SELECTS
        ) || self.id_filters.iter().any(|k| k == key)
            || self.selects.iter().any(|k| k == key)
            || self.extras.contains_key(key)
    }

    /// Merge caller options with the declared defaults.
    ///
    /// # Errors
    /// Returns a parameter error for non-object input, unknown keys, malformed
    /// values and fields outside the entity whitelists.
    pub fn normalize(&self, input: &Value) -> ApiResult<QueryOptions> {
        let empty = Map::new();
        let input = match input {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(ApiError::parameters(
                    "Invalid parameter \"/\": an array is expected.",
                ));
            }
        };

        if let Some(key) = input.keys().find(|k| !self.is_known(k)) {
            return Err(ApiError::parameters(format!(
                "Invalid parameter \"/\": unexpected parameter \"{key}\"."
            )));
        }

        let flag = |key: &str| input.get(key).is_some_and(truthy);

        let mut opts = QueryOptions {
            search_flags: SearchFlags {
                by_any: flag(SEARCH_BY_ANY),
                start: flag(START_SEARCH),
                exclude: flag(EXCLUDE_SEARCH),
                wildcards: flag(SEARCH_WILDCARDS),
            },
            count_output: flag(COUNT_OUTPUT),
            group_count: flag(GROUP_COUNT),
            preserve_keys: flag(PRESERVE_KEYS),
            editable: flag(EDITABLE),
            nopermissions: flag(NOPERMISSIONS),
            output: self.default_output.clone(),
            ..QueryOptions::default()
        };

        if let Some(value) = input.get(OUTPUT).filter(|v| !v.is_null()) {
            opts.output = Output::parse("/output", value)?;
        }
        if let Output::Fields(fields) = &opts.output {
            for field in fields {
                if !self.has_output_field(field) {
                    return Err(ApiError::parameters(format!(
                        "Invalid parameter \"/output\": unknown field \"{field}\"."
                    )));
                }
            }
        }
        if opts.output == Output::Count {
            opts.count_output = true;
        }
        if opts.group_count && !opts.count_output {
            tracing::debug!("groupCount without countOutput has no effect");
        }

        for key in &self.id_filters {
            if let Some(value) = input.get(key).filter(|v| !v.is_null()) {
                opts.ids.insert(key.clone(), parse_ids(key, value)?);
            }
        }

        for key in &self.selects {
            if let Some(value) = input.get(key).filter(|v| !v.is_null()) {
                opts.selects
                    .insert(key.clone(), Output::parse(&format!("/{key}"), value)?);
            }
        }

        for (key, default) in &self.extras {
            let value = input.get(key).cloned().unwrap_or_else(|| default.clone());
            opts.extra.insert(key.clone(), value);
        }

        if let Some(value) = input.get(FILTER).filter(|v| !v.is_null()) {
            opts.filter = self.parse_filter(value)?;
        }
        if let Some(value) = input.get(SEARCH).filter(|v| !v.is_null()) {
            opts.search = self.parse_search(value)?;
        }

        opts.sort = self.parse_sort(input.get(SORT_FIELD), input.get(SORT_ORDER))?;
        opts.limit = parse_limit(LIMIT, input.get(LIMIT));
        opts.limit_selects = parse_limit(LIMIT_SELECTS, input.get(LIMIT_SELECTS));

        Ok(opts)
    }

    fn parse_filter(&self, value: &Value) -> ApiResult<IndexMap<String, Vec<SqlValue>>> {
        let obj = expect_object("/filter", value)?;
        let mut out = IndexMap::new();
        for (field, values) in obj {
            if !self.filter_whitelist().iter().any(|f| f == field) {
                return Err(ApiError::parameters(format!(
                    "Invalid parameter \"/filter\": unexpected parameter \"{field}\"."
                )));
            }
            let list = match values {
                Value::Null => continue,
                Value::Array(items) => items
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(SqlValue::from_json)
                    .collect::<ApiResult<Vec<_>>>()?,
                scalar => vec![SqlValue::from_json(scalar)?],
            };
            out.insert(field.clone(), list);
        }
        Ok(out)
    }

    fn parse_search(&self, value: &Value) -> ApiResult<IndexMap<String, Vec<String>>> {
        let obj = expect_object("/search", value)?;
        let mut out = IndexMap::new();
        for (field, values) in obj {
            if !self.search_fields.iter().any(|f| f == field) {
                return Err(ApiError::parameters(format!(
                    "Invalid parameter \"/search\": unexpected parameter \"{field}\"."
                )));
            }
            let patterns: Vec<String> = match values {
                Value::Array(items) => items.iter().filter_map(search_pattern).collect(),
                other => search_pattern(other).into_iter().collect(),
            };
            if !patterns.is_empty() {
                out.insert(field.clone(), patterns);
            }
        }
        Ok(out)
    }

    fn parse_sort(
        &self,
        fields: Option<&Value>,
        orders: Option<&Value>,
    ) -> ApiResult<Vec<(String, SortDir)>> {
        let fields: Vec<String> = match fields {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::String(s)) if s.is_empty() => return Ok(Vec::new()),
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_owned).ok_or_else(|| {
                        ApiError::parameters(
                            "Invalid parameter \"/sortfield\": a character string is expected.",
                        )
                    })
                })
                .collect::<ApiResult<_>>()?,
            Some(_) => {
                return Err(ApiError::parameters(
                    "Invalid parameter \"/sortfield\": an array is expected.",
                ));
            }
        };

        for field in &fields {
            if !self.sort_fields.iter().any(|f| f == field) {
                return Err(ApiError::parameters(format!(
                    "Sorting by field \"{field}\" not allowed."
                )));
            }
        }

        let dirs: Vec<SortDir> = match orders {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| SortDir::parse(&format!("/sortorder/{}", i + 1), v))
                .collect::<ApiResult<_>>()?,
            Some(single) => vec![SortDir::parse("/sortorder", single)?; fields.len()],
        };

        Ok(fields
            .into_iter()
            .enumerate()
            .map(|(i, f)| (f, dirs.get(i).copied().unwrap_or_default()))
            .collect())
    }
}

fn expect_object<'a>(path: &str, value: &'a Value) -> ApiResult<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        ApiError::parameters(format!("Invalid parameter \"{path}\": an array is expected."))
    })
}

fn search_pattern(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_ids(key: &str, value: &Value) -> ApiResult<Vec<Id>> {
    let invalid = || {
        ApiError::parameters(format!(
            "Invalid parameter \"/{key}\": an array of identifiers is expected."
        ))
    };
    match value {
        Value::Array(items) => items.iter().map(|v| id_of(v).ok_or_else(invalid)).collect(),
        scalar => id_of(scalar).map(|id| vec![id]).ok_or_else(invalid),
    }
}

/// Positive integer limits only; anything else is ignored.
fn parse_limit(key: &str, value: Option<&Value>) -> Option<u64> {
    let value = value.filter(|v| !v.is_null())?;
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .filter(|n| *n > 0);
    if parsed.is_none() {
        tracing::debug!(option = key, value = %value, "ignoring malformed limit");
    }
    parsed
}

/// Loose boolean reading of a flag value.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
