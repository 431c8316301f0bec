//! Parent-to-related id associations and their attachment onto result rows.

use std::cmp::Ordering;
use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use crate::value::{Id, ResultSet, Row, id_of};

/// Parent id to insertion-ordered set of related ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationMap {
    map: IndexMap<Id, IndexSet<Id>>,
}

impl RelationMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows carrying both ids. Rows with a missing parent are skipped;
    /// a missing related id still registers the parent.
    pub fn from_rows<'a>(
        rows: impl IntoIterator<Item = &'a Row>,
        parent_field: &str,
        related_field: &str,
    ) -> Self {
        let mut map = Self::new();
        for row in rows {
            let Some(parent) = row.get(parent_field).and_then(id_of) else {
                continue;
            };
            map.add_parent(parent);
            if let Some(related) = row.get(related_field).and_then(id_of) {
                map.add_relation(parent, related);
            }
        }
        map
    }

    pub fn add_parent(&mut self, parent: Id) {
        self.map.entry(parent).or_default();
    }

    pub fn add_relation(&mut self, parent: Id, related: Id) {
        self.map.entry(parent).or_default().insert(related);
    }

    /// All related ids, distinct, in first-seen order.
    #[must_use]
    pub fn related_ids(&self) -> Vec<Id> {
        let ids: IndexSet<Id> = self.map.values().flatten().copied().collect();
        ids.into_iter().collect()
    }

    #[must_use]
    pub fn parent_ids(&self) -> Vec<Id> {
        self.map.keys().copied().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Related objects of `parent`, in `objects` order, optionally re-sorted by
    /// `sort_key` and capped at `limit`.
    fn matching<'a>(
        &self,
        parent: Id,
        objects: &'a ResultSet,
        limit: Option<usize>,
        sort_key: Option<&str>,
    ) -> Vec<&'a Row> {
        let Some(related) = self.map.get(&parent) else {
            return Vec::new();
        };
        let mut found: Vec<(usize, &Row)> = related
            .iter()
            .filter_map(|id| objects.get_full(id).map(|(index, _, row)| (index, row)))
            .collect();
        found.sort_unstable_by_key(|(index, _)| *index);
        let mut matched: Vec<&Row> = found.into_iter().map(|(_, row)| row).collect();
        if let Some(key) = sort_key {
            matched.sort_by(|a, b| compare_values(a.get(key), b.get(key)));
        }
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        matched
    }

    /// Per parent, the array of related objects (capped at `limit`).
    #[must_use]
    pub fn many_values(
        &self,
        objects: &ResultSet,
        limit: Option<usize>,
        sort_key: Option<&str>,
    ) -> HashMap<Id, Value> {
        self.map
            .keys()
            .map(|parent| {
                let rows = self
                    .matching(*parent, objects, limit, sort_key)
                    .into_iter()
                    .map(|row| Value::Object(row.clone()))
                    .collect();
                (*parent, Value::Array(rows))
            })
            .collect()
    }

    /// Per parent, the single related object. Parents without a visible match are left out.
    #[must_use]
    pub fn one_values(&self, objects: &ResultSet) -> HashMap<Id, Value> {
        self.map
            .keys()
            .filter_map(|parent| {
                self.matching(*parent, objects, Some(1), None)
                    .into_iter()
                    .next()
                    .map(|row| (*parent, Value::Object(row.clone())))
            })
            .collect()
    }

    /// Attach related objects to every row under `name`; `[]` when none.
    pub fn map_many(
        &self,
        rows: &mut ResultSet,
        objects: &ResultSet,
        name: &str,
        limit: Option<usize>,
        sort_key: Option<&str>,
    ) {
        let mut values = self.many_values(objects, limit, sort_key);
        for (id, row) in rows.iter_mut() {
            let value = values.remove(id).unwrap_or_else(|| Value::Array(Vec::new()));
            row.insert(name.to_owned(), value);
        }
    }

    /// Attach the related object to every row under `name`; `[]` when none.
    pub fn map_one(&self, rows: &mut ResultSet, objects: &ResultSet, name: &str) {
        let mut values = self.one_values(objects);
        for (id, row) in rows.iter_mut() {
            let value = values.remove(id).unwrap_or_else(|| Value::Array(Vec::new()));
            row.insert(name.to_owned(), value);
        }
    }
}

/// Total order over JSON scalars: nulls, then numbers, then strings.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_) | Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Array(_) | Value::Object(_)) => 3,
        }
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    fn set(rows: Vec<(Id, Value)>) -> ResultSet {
        rows.into_iter().map(|(id, v)| (id, row(v))).collect()
    }

    #[test]
    fn from_rows_keeps_first_seen_order() {
        let links = [
            row(json!({"groupid": 2, "hostid": 10})),
            row(json!({"groupid": 1, "hostid": 11})),
            row(json!({"groupid": 2, "hostid": 11})),
            row(json!({"groupid": 3, "hostid": null})),
        ];
        let map = RelationMap::from_rows(&links, "groupid", "hostid");
        assert_eq!(map.parent_ids(), vec![2, 1, 3]);
        assert_eq!(map.related_ids(), vec![10, 11]);
    }

    #[test]
    fn map_many_caps_per_parent_in_object_order() {
        let mut map = RelationMap::new();
        for host in [13, 11, 12] {
            map.add_relation(1, host);
        }
        map.add_parent(2);

        let objects = set(vec![
            (11, json!({"hostid": 11, "name": "b"})),
            (12, json!({"hostid": 12, "name": "a"})),
            (13, json!({"hostid": 13, "name": "c"})),
        ]);
        let mut parents = set(vec![(1, json!({"groupid": 1})), (2, json!({"groupid": 2}))]);

        map.map_many(&mut parents, &objects, "hosts", Some(2), None);
        assert_eq!(parents[&1]["hosts"], json!([{"hostid": 11, "name": "b"}, {"hostid": 12, "name": "a"}]));
        assert_eq!(parents[&2]["hosts"], json!([]));

        map.map_many(&mut parents, &objects, "hosts", Some(2), Some("name"));
        assert_eq!(parents[&1]["hosts"][0]["name"], json!("a"));
        assert_eq!(parents[&1]["hosts"][1]["name"], json!("b"));
    }

    #[test]
    fn unfetched_related_ids_are_skipped() {
        let mut map = RelationMap::new();
        for host in [40, 30, 99, 10] {
            map.add_relation(1, host);
        }
        let objects = set(vec![
            (10, json!({"hostid": 10})),
            (20, json!({"hostid": 20})),
            (30, json!({"hostid": 30})),
            (40, json!({"hostid": 40})),
        ]);
        let values = map.many_values(&objects, None, None);
        assert_eq!(values[&1], json!([{"hostid": 10}, {"hostid": 30}, {"hostid": 40}]));
    }

    #[test]
    fn map_one_yields_empty_array_without_match() {
        let mut map = RelationMap::new();
        map.add_relation(10, 100);
        map.add_relation(11, 101);

        let objects = set(vec![(100, json!({"templateid": 100}))]);
        let mut rows = set(vec![
            (10, json!({"hostid": 10})),
            (11, json!({"hostid": 11})),
            (12, json!({"hostid": 12})),
        ]);
        map.map_one(&mut rows, &objects, "template");

        assert_eq!(rows[&10]["template"], json!({"templateid": 100}));
        assert_eq!(rows[&11]["template"], json!([]));
        assert_eq!(rows[&12]["template"], json!([]));
    }

    #[test]
    fn compare_orders_numbers_before_strings() {
        assert_eq!(compare_values(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(compare_values(None, Some(&json!(1))), Ordering::Less);
    }
}
