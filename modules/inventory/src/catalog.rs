//! Entity definitions of the inventory API.

use apikit_db::{
    AclPolicy, Api, EntityDef, Fragment, GroupAclPath, OptionSchema, QueryRunner, RelatedStep,
    ShareAcl, ShareTable, SqlValue, UserType, id_in, linked_id_in,
};
use serde_json::Value;

pub const HOST_GROUP: &str = "hostgroup";
pub const HOST: &str = "host";
pub const HOST_TAG: &str = "hosttag";
pub const HOST_INVENTORY: &str = "hostinventory";
pub const ITEM: &str = "item";
pub const SCRIPT: &str = "script";
pub const MAP: &str = "map";

/// Host rows reach rights through their host groups.
fn via_host_groups() -> AclPolicy {
    AclPolicy::groups(vec![GroupAclPath::linked("hosts_groups", "hostid", "hostid")])
}

fn host_group() -> EntityDef {
    EntityDef::new(HOST_GROUP, "hstgrp", "g", "groupid")
        .step(
            RelatedStep::many("selectHosts", "hosts", HOST)
                .through("hosts_groups", "groupid", "hostid")
                .by_parent("groupids", "groupid")
                .sorted_by("host"),
        )
        .schema(
            OptionSchema::new()
                .output_fields(&["groupid", "name"])
                .search_fields(&["name"])
                .sort_fields(&["groupid", "name"])
                .id_filter("hostids")
                .extra("with_hosts", Value::Null),
        )
        .acl(AclPolicy::groups(vec![GroupAclPath::direct("groupid")]))
        .predicate(
            "hostids",
            linked_id_in("hosts_groups hg", "hg.groupid=g.groupid", "hg.hostid"),
        )
        .predicate("with_hosts", |ctx, clauses| {
            clauses.add_where(
                Some(ctx.key),
                format!(
                    "EXISTS (SELECT NULL FROM hosts_groups wh WHERE wh.groupid={})",
                    ctx.column("groupid")
                ),
            );
            Ok(())
        })
}

fn host() -> EntityDef {
    EntityDef::new(HOST, "hosts", "h", "hostid")
        .step(
            RelatedStep::many("selectHostGroups", "hostgroups", HOST_GROUP)
                .through("hosts_groups", "hostid", "groupid")
                .by_parent("hostids", "hostid")
                .sorted_by("name"),
        )
        .step(
            RelatedStep::many("selectItems", "items", ITEM)
                .child_column("hostid")
                .by_parent("hostids", "hostid")
                .sorted_by("name"),
        )
        .step(
            RelatedStep::many("selectTags", "tags", HOST_TAG)
                .child_column("hostid")
                .by_parent("hostids", "hostid"),
        )
        .step(
            RelatedStep::one("selectInventory", "inventory", HOST_INVENTORY)
                .child_column("hostid")
                .by_parent("hostids", "hostid"),
        )
        .schema(
            OptionSchema::new()
                .output_fields(&["hostid", "host", "name", "status", "description"])
                .search_fields(&["host", "name", "description"])
                .sort_fields(&["hostid", "host", "name", "status"])
                .id_filter("groupids")
                .id_filter("itemids")
                .extra("monitored_hosts", Value::Null)
                .extra("withInventory", Value::Null),
        )
        .acl(via_host_groups())
        .predicate(
            "groupids",
            linked_id_in("hosts_groups hg", "hg.hostid=h.hostid", "hg.groupid"),
        )
        .predicate(
            "itemids",
            linked_id_in("items it", "it.hostid=h.hostid", "it.itemid"),
        )
        .predicate("monitored_hosts", |ctx, clauses| {
            clauses.add_where(
                Some(ctx.key),
                Fragment::new(format!("{}=?", ctx.column("status")), vec![SqlValue::Int(0)]),
            );
            Ok(())
        })
        .predicate("withInventory", |ctx, clauses| {
            clauses
                .add_left_join(
                    ctx.key,
                    format!("LEFT JOIN host_inventory hi ON hi.hostid={}", ctx.column("hostid")),
                )
                .add_where(Some(ctx.key), "hi.hostid IS NOT NULL");
            Ok(())
        })
}

fn host_tag() -> EntityDef {
    EntityDef::new(HOST_TAG, "host_tag", "ht", "hosttagid")
        .schema(
            OptionSchema::new()
                .output_fields(&["hosttagid", "hostid", "tag", "value"])
                .search_fields(&["tag", "value"])
                .sort_fields(&["tag", "value"])
                .id_filter("hostids"),
        )
        .acl(via_host_groups())
        .predicate("hostids", id_in("hostid"))
}

fn host_inventory() -> EntityDef {
    EntityDef::new(HOST_INVENTORY, "host_inventory", "hi", "hostid")
        .schema(
            OptionSchema::new()
                .output_fields(&["hostid", "os", "location"])
                .search_fields(&["os", "location"]),
        )
        .acl(via_host_groups())
}

fn item() -> EntityDef {
    EntityDef::new(ITEM, "items", "i", "itemid")
        .step(RelatedStep::one("selectHost", "host", HOST).parent_column("hostid"))
        .schema(
            OptionSchema::new()
                .output_fields(&["itemid", "hostid", "name", "key_", "status"])
                .search_fields(&["name", "key_"])
                .sort_fields(&["itemid", "name", "key_", "status"])
                .id_filter("hostids")
                .id_filter("groupids")
                .extra("monitored", Value::Null),
        )
        .acl(via_host_groups())
        .predicate("hostids", id_in("hostid"))
        .predicate(
            "groupids",
            linked_id_in("hosts_groups hg", "hg.hostid=i.hostid", "hg.groupid"),
        )
        .predicate("monitored", |ctx, clauses| {
            clauses
                .add_from("hosts mh", "hosts mh")
                .add_where(Some("monitored:join"), format!("mh.hostid={}", ctx.column("hostid")))
                .add_where(
                    Some(ctx.key),
                    Fragment::new(
                        format!("mh.status=? AND {}=?", ctx.column("status")),
                        vec![SqlValue::Int(0), SqlValue::Int(0)],
                    ),
                );
            Ok(())
        })
}

/// Global scripts are visible everywhere; group-bound ones follow host group rights.
fn script() -> EntityDef {
    EntityDef::new(SCRIPT, "scripts", "sc", "scriptid")
        .step(RelatedStep::one("selectHostGroup", "hostgroup", HOST_GROUP).parent_column("groupid"))
        .schema(
            OptionSchema::new()
                .output_fields(&["scriptid", "name", "command", "groupid"])
                .search_fields(&["name", "command"])
                .sort_fields(&["scriptid", "name"])
                .id_filter("groupids"),
        )
        .acl(
            AclPolicy::groups(vec![GroupAclPath::linked("hstgrp", "groupid", "groupid").nullable()])
                .editable_requires(UserType::SuperAdmin),
        )
        .predicate("groupids", |ctx, clauses| {
            let column = ctx.column("groupid");
            let ids = Fragment::ids_in(&column, ctx.ids());
            clauses.add_where(
                Some(ctx.key),
                Fragment::new(format!("({column} IS NULL OR {})", ids.sql()), ids.params().to_vec()),
            );
            Ok(())
        })
}

fn map() -> EntityDef {
    EntityDef::new(MAP, "sysmaps", "s", "sysmapid")
        .schema(
            OptionSchema::new()
                .output_fields(&["sysmapid", "name", "width", "height", "userid", "private"])
                .search_fields(&["name"])
                .sort_fields(&["sysmapid", "name", "width", "height"]),
        )
        .acl(AclPolicy::shared(ShareAcl {
            users: ShareTable::new("sysmap_user", "sysmapid", "userid"),
            user_groups: ShareTable::new("sysmap_usrgrp", "sysmapid", "usrgrpid"),
            owner_col: "userid".to_owned(),
            private_col: Some("private".to_owned()),
        }))
}

/// All inventory entities served by one runner.
#[must_use]
pub fn build_api<R: QueryRunner + 'static>(runner: R) -> Api {
    let mut api = Api::new(runner);
    api.register(host_group())
        .register(host())
        .register(host_tag())
        .register(host_inventory())
        .register(item())
        .register(script())
        .register(map());
    api
}
