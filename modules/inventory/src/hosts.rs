//! Host create, update and delete.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use apikit_db::runner::fetch_rows;
use apikit_db::value::id_of;
use apikit_db::write::{self, Update};
use apikit_db::{
    AccessLevel, Api, ApiError, ApiResult, CallerContext, DbHandle, Fragment, Id, Row, Statement, UserType,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::catalog::{HOST, HOST_GROUP};

#[allow(clippy::expect_used)]
static HOST_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z_. \-]+$").expect("static regex should not panic"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostTag {
    pub tag: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostCreate {
    /// Technical name, unique.
    pub host: String,
    /// Visible name; defaults to `host`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub description: String,
    pub groups: Vec<Id>,
    #[serde(default)]
    pub tags: Vec<HostTag>,
}

/// Partial host update; `groups` and `tags` replace the stored sets when given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostUpdate {
    pub hostid: Id,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<Id>>,
    #[serde(default)]
    pub tags: Option<Vec<HostTag>>,
}

impl HostCreate {
    fn row(&self) -> Row {
        let mut row = Row::new();
        row.insert("host".to_owned(), Value::from(self.host.clone()));
        row.insert(
            "name".to_owned(),
            Value::from(self.name.clone().unwrap_or_else(|| self.host.clone())),
        );
        row.insert("status".to_owned(), Value::from(self.status));
        row.insert("description".to_owned(), Value::from(self.description.clone()));
        row
    }
}

impl HostUpdate {
    fn update(&self) -> Option<Update> {
        let mut values = Row::new();
        if let Some(name) = &self.name {
            values.insert("name".to_owned(), Value::from(name.clone()));
        }
        if let Some(status) = self.status {
            values.insert("status".to_owned(), Value::from(status));
        }
        if let Some(description) = &self.description {
            values.insert("description".to_owned(), Value::from(description.clone()));
        }
        if values.is_empty() {
            return None;
        }
        let mut cond = Row::new();
        cond.insert("hostid".to_owned(), Value::from(self.hostid));
        Some(Update {
            values,
            r#where: cond,
        })
    }
}

fn link_row(hostid: Id, groupid: Id) -> Row {
    let mut row = Row::new();
    row.insert("hostid".to_owned(), Value::from(hostid));
    row.insert("groupid".to_owned(), Value::from(groupid));
    row
}

fn tag_row(hostid: Id, tag: &HostTag) -> Row {
    let mut row = Row::new();
    row.insert("hostid".to_owned(), Value::from(hostid));
    row.insert("tag".to_owned(), Value::from(tag.tag.clone()));
    row.insert("value".to_owned(), Value::from(tag.value.clone()));
    row
}

/// Desired rows for one host: stored rows that match `same` are reused with their ids.
fn desired<T>(old: &[Row], wanted: &[T], same: impl Fn(&Row, &T) -> bool, build: impl Fn(&T) -> Row) -> Vec<Row> {
    wanted
        .iter()
        .map(|w| {
            old.iter()
                .find(|row| same(row, w))
                .cloned()
                .unwrap_or_else(|| build(w))
        })
        .collect()
}

fn by_host(rows: Vec<Row>) -> HashMap<Id, Vec<Row>> {
    let mut map: HashMap<Id, Vec<Row>> = HashMap::new();
    for row in rows {
        if let Some(hostid) = row.get("hostid").and_then(id_of) {
            map.entry(hostid).or_default().push(row);
        }
    }
    map
}

fn validate_groups(host: &str, groups: &[Id]) -> ApiResult<()> {
    if groups.is_empty() {
        return Err(ApiError::parameters(format!("Host \"{host}\" cannot be without host group.")));
    }
    Ok(())
}

fn unique_groups<'a>(groups: impl Iterator<Item = &'a Id>) -> Vec<Id> {
    let mut ids: Vec<Id> = groups.copied().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Host writes. Every mutation runs in one transaction.
#[derive(Debug, Clone)]
pub struct HostService {
    api: Arc<Api>,
    db: DbHandle,
}

impl HostService {
    #[must_use]
    pub fn new(api: Arc<Api>, db: DbHandle) -> Self {
        Self { api, db }
    }

    /// Create hosts with their group links and tags; returns ids in input order.
    ///
    /// # Errors
    /// Parameter errors for invalid or duplicate names and missing groups;
    /// the permission error when the caller is below admin or cannot write to a group.
    pub async fn create(&self, caller: &CallerContext, hosts: Vec<HostCreate>) -> ApiResult<Vec<Id>> {
        if !caller.is_at_least(UserType::Admin) {
            return Err(ApiError::no_permissions());
        }
        self.validate_create(caller, &hosts).await?;
        let groups = unique_groups(hosts.iter().flat_map(|h| h.groups.iter()));
        self.api
            .ensure_accessible(caller, HOST_GROUP, &groups, AccessLevel::ReadWrite)
            .await?;

        let ids = self
            .db
            .with_tx(move |tx| {
                Box::pin(async move {
                    let rows: Vec<Row> = hosts.iter().map(HostCreate::row).collect();
                    let ids = write::insert(&mut **tx, "hosts", "hostid", &rows).await?;

                    let mut links = Vec::new();
                    let mut tags = Vec::new();
                    for (host, id) in hosts.iter().zip(&ids) {
                        links.extend(host.groups.iter().map(|g| link_row(*id, *g)));
                        tags.extend(host.tags.iter().map(|t| tag_row(*id, t)));
                    }
                    write::insert(&mut **tx, "hosts_groups", "hostgroupid", &links).await?;
                    write::insert(&mut **tx, "host_tag", "hosttagid", &tags).await?;
                    Ok::<_, ApiError>(ids)
                })
            })
            .await?;
        tracing::info!(user = caller.user_id(), count = ids.len(), "hosts created");
        Ok(ids)
    }

    async fn validate_create(&self, caller: &CallerContext, hosts: &[HostCreate]) -> ApiResult<()> {
        if hosts.is_empty() {
            return Err(ApiError::parameters("Empty input parameter."));
        }
        let mut names: Vec<&str> = Vec::with_capacity(hosts.len());
        for host in hosts {
            if !HOST_NAME.is_match(&host.host) {
                return Err(ApiError::parameters(format!(
                    "Incorrect characters used for host name \"{}\".",
                    host.host
                )));
            }
            validate_groups(&host.host, &host.groups)?;
            if names.contains(&host.host.as_str()) {
                return Err(ApiError::parameters(format!(
                    "Host with the same name \"{}\" already exists.",
                    host.host
                )));
            }
            names.push(&host.host);
        }

        let existing = self
            .api
            .get(
                caller,
                HOST,
                &json!({"output": ["host"], "filter": {"host": names}, "nopermissions": true, "limit": 1}),
            )
            .await?
            .into_rows()?;
        if let Some(name) = existing.first().and_then(|row| row.get("host")).and_then(Value::as_str) {
            return Err(ApiError::parameters(format!(
                "Host with the same name \"{name}\" already exists."
            )));
        }
        Ok(())
    }

    /// Update host fields; given group and tag sets replace the stored ones by diff.
    ///
    /// # Errors
    /// Parameter errors for empty input or empty group sets; the permission error
    /// when a host or a newly referenced group is not writable for the caller.
    pub async fn update(&self, caller: &CallerContext, hosts: Vec<HostUpdate>) -> ApiResult<Vec<Id>> {
        if hosts.is_empty() {
            return Err(ApiError::parameters("Empty input parameter."));
        }
        let ids: Vec<Id> = hosts.iter().map(|h| h.hostid).collect();
        self.api
            .ensure_accessible(caller, HOST, &ids, AccessLevel::ReadWrite)
            .await?;
        for host in &hosts {
            if let Some(groups) = &host.groups {
                validate_groups(&host.hostid.to_string(), groups)?;
            }
        }
        let groups = unique_groups(hosts.iter().filter_map(|h| h.groups.as_ref()).flatten());
        self.api
            .ensure_accessible(caller, HOST_GROUP, &groups, AccessLevel::ReadWrite)
            .await?;

        let updated = ids.clone();
        self.db
            .with_tx(move |tx| {
                Box::pin(async move {
                    let updates: Vec<Update> = hosts.iter().filter_map(HostUpdate::update).collect();
                    write::update(&mut **tx, "hosts", &updates).await?;

                    let filter = Fragment::ids_in("hostid", &ids);
                    let mut old_links = by_host(
                        fetch_rows(
                            &mut **tx,
                            &Statement::new(
                                format!("SELECT hostgroupid,hostid,groupid FROM hosts_groups WHERE {}", filter.sql()),
                                filter.params().to_vec(),
                            ),
                        )
                        .await?,
                    );
                    let mut old_tags = by_host(
                        fetch_rows(
                            &mut **tx,
                            &Statement::new(
                                format!("SELECT hosttagid,hostid,tag,value FROM host_tag WHERE {}", filter.sql()),
                                filter.params().to_vec(),
                            ),
                        )
                        .await?,
                    );

                    for host in &hosts {
                        let id = host.hostid;
                        if let Some(groups) = &host.groups {
                            let old = old_links.remove(&id).unwrap_or_default();
                            let new = desired(
                                &old,
                                groups,
                                |row, g| row.get("groupid").and_then(id_of) == Some(*g),
                                |g| link_row(id, *g),
                            );
                            write::replace(&mut **tx, "hosts_groups", "hostgroupid", &old, new).await?;
                        }
                        if let Some(tags) = &host.tags {
                            let old = old_tags.remove(&id).unwrap_or_default();
                            let new = desired(
                                &old,
                                tags,
                                |row, t| {
                                    row.get("tag").and_then(Value::as_str) == Some(t.tag.as_str())
                                        && row.get("value").and_then(Value::as_str) == Some(t.value.as_str())
                                },
                                |t| tag_row(id, t),
                            );
                            write::replace(&mut **tx, "host_tag", "hosttagid", &old, new).await?;
                        }
                    }
                    Ok::<_, ApiError>(())
                })
            })
            .await?;
        tracing::info!(user = caller.user_id(), count = updated.len(), "hosts updated");
        Ok(updated)
    }

    /// Delete hosts; links, tags, items and inventory follow through cascades.
    ///
    /// # Errors
    /// The permission error when a host is not writable for the caller.
    pub async fn delete(&self, caller: &CallerContext, hostids: &[Id]) -> ApiResult<Vec<Id>> {
        if hostids.is_empty() {
            return Err(ApiError::parameters("Empty input parameter."));
        }
        self.api
            .ensure_accessible(caller, HOST, hostids, AccessLevel::ReadWrite)
            .await?;
        let ids = hostids.to_vec();
        let deleted = ids.clone();
        self.db
            .with_tx(move |tx| {
                Box::pin(async move {
                    write::delete(&mut **tx, "hosts", "hostid", &ids).await?;
                    Ok::<_, ApiError>(())
                })
            })
            .await?;
        tracing::info!(user = caller.user_id(), count = deleted.len(), "hosts deleted");
        Ok(deleted)
    }
}
