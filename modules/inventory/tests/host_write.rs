#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use apikit_errors::ErrorCode;
use apikit_inventory::catalog::{HOST, ITEM};
use apikit_inventory::{HostCreate, HostService, HostTag, HostUpdate};
use common::{ADMIN, NETADMIN, OPERATOR, column, fixture};
use serde_json::json;

fn new_host(host: &str, groups: &[i64]) -> HostCreate {
    HostCreate {
        host: host.to_owned(),
        groups: groups.to_vec(),
        ..HostCreate::default()
    }
}

fn tag(tag: &str, value: &str) -> HostTag {
    HostTag {
        tag: tag.to_owned(),
        value: value.to_owned(),
    }
}

#[tokio::test]
async fn created_hosts_come_back_in_order() {
    let f = fixture().await;
    let service = HostService::new(f.api.clone(), f.db.clone());
    let admin = f.caller(ADMIN).await;

    let ids = service
        .create(
            &admin,
            vec![
                HostCreate {
                    name: Some("Mail relay".to_owned()),
                    tags: vec![tag("role", "mail")],
                    ..new_host("mail01", &[1])
                },
                new_host("backup01", &[1, 3]),
            ],
        )
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids[0] < ids[1]);

    let out = f
        .get(
            ADMIN,
            HOST,
            json!({
                "hostids": ids,
                "output": ["host", "name"],
                "selectTags": ["tag", "value"],
                "selectHostGroups": ["groupid"],
                "sortfield": "hostid",
            }),
        )
        .await;
    assert_eq!(
        out,
        json!([
            {"hostid": ids[0], "host": "mail01", "name": "Mail relay",
             "tags": [{"hosttagid": 5, "tag": "role", "value": "mail"}],
             "hostgroups": [{"groupid": 1}]},
            {"hostid": ids[1], "host": "backup01", "name": "backup01",
             "tags": [],
             "hostgroups": [{"groupid": 3}, {"groupid": 1}]},
        ])
    );
}

#[tokio::test]
async fn create_checks_caller_and_input() {
    let f = fixture().await;
    let service = HostService::new(f.api.clone(), f.db.clone());
    let operator = f.caller(OPERATOR).await;
    let netadmin = f.caller(NETADMIN).await;
    let admin = f.caller(ADMIN).await;

    let err = service
        .create(&operator, vec![new_host("x1", &[1])])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Permissions);

    // read-only group
    let err = service
        .create(&netadmin, vec![new_host("x1", &[1])])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Permissions);
    service
        .create(&netadmin, vec![new_host("sw02", &[2])])
        .await
        .unwrap();

    for (input, message) in [
        (vec![], "Empty input parameter."),
        (vec![new_host("x1", &[])], "Host \"x1\" cannot be without host group."),
        (vec![new_host("bad/name", &[1])], "Incorrect characters used for host name \"bad/name\"."),
        (
            vec![new_host("x1", &[1]), new_host("x1", &[1])],
            "Host with the same name \"x1\" already exists.",
        ),
        (vec![new_host("web01", &[1])], "Host with the same name \"web01\" already exists."),
    ] {
        let err = service.create(&admin, input).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parameters);
        assert_eq!(err.to_string(), message);
    }

    let err = service
        .create(&admin, vec![new_host("x1", &[99])])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Permissions);
}

#[tokio::test]
async fn update_replaces_tags_and_groups_by_diff() {
    let f = fixture().await;
    let service = HostService::new(f.api.clone(), f.db.clone());
    let admin = f.caller(ADMIN).await;

    service
        .update(
            &admin,
            vec![HostUpdate {
                hostid: 10,
                name: Some("Web server one".to_owned()),
                groups: Some(vec![3, 1]),
                tags: Some(vec![tag("env", "prod"), tag("owner", "ops")]),
                ..HostUpdate::default()
            }],
        )
        .await
        .unwrap();

    let out = f
        .get(
            ADMIN,
            HOST,
            json!({"hostids": 10, "output": ["name"], "selectTags": "extend", "selectHostGroups": ["groupid"]}),
        )
        .await;
    assert_eq!(
        out,
        json!([{
            "hostid": 10,
            "name": "Web server one",
            "tags": [
                {"hosttagid": 1, "hostid": 10, "tag": "env", "value": "prod"},
                {"hosttagid": 5, "hostid": 10, "tag": "owner", "value": "ops"},
            ],
            // sorted by group name
            "hostgroups": [{"groupid": 3}, {"groupid": 1}],
        }])
    );

    let links: Vec<(i64, i64)> = sqlx::query_as("SELECT hostgroupid, groupid FROM hosts_groups WHERE hostid=10 ORDER BY groupid")
        .fetch_all(f.db.pool())
        .await
        .unwrap();
    assert_eq!(links[0], (1, 1), "existing link kept its id");
    assert_eq!(links[1].1, 3);
}

#[tokio::test]
async fn update_requires_write_access() {
    let f = fixture().await;
    let service = HostService::new(f.api.clone(), f.db.clone());
    let netadmin = f.caller(NETADMIN).await;

    let err = service
        .update(&netadmin, vec![HostUpdate { hostid: 10, status: Some(1), ..HostUpdate::default() }])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Permissions);

    let err = service
        .update(&netadmin, vec![HostUpdate { hostid: 13, groups: Some(vec![1]), ..HostUpdate::default() }])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Permissions);

    let err = service
        .update(&netadmin, vec![HostUpdate { hostid: 13, groups: Some(vec![]), ..HostUpdate::default() }])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Parameters);

    service
        .update(&netadmin, vec![HostUpdate { hostid: 13, status: Some(1), ..HostUpdate::default() }])
        .await
        .unwrap();
    let out = f
        .get(NETADMIN, HOST, json!({"hostids": 13, "output": ["status"]}))
        .await;
    assert_eq!(out, json!([{"hostid": 13, "status": 1}]));
}

#[tokio::test]
async fn delete_cascades_to_children() {
    let f = fixture().await;
    let service = HostService::new(f.api.clone(), f.db.clone());
    let operator = f.caller(OPERATOR).await;
    let admin = f.caller(ADMIN).await;

    let err = service.delete(&operator, &[10]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Permissions);

    service.delete(&admin, &[10]).await.unwrap();
    assert_eq!(f.get(ADMIN, HOST, json!({"hostids": 10})).await, json!([]));
    assert_eq!(
        f.get(ADMIN, ITEM, json!({"hostids": 10, "countOutput": true})).await,
        json!(0)
    );
}

#[tokio::test]
async fn one_batched_fetch_per_relation_kind() {
    let f = fixture().await;
    let service = HostService::new(f.api.clone(), f.db.clone());
    let admin = f.caller(ADMIN).await;

    let hosts = (0..50)
        .map(|n| HostCreate {
            tags: vec![tag("batch", &n.to_string())],
            ..new_host(&format!("bulk{n:02}"), &[3])
        })
        .collect();
    let ids = service.create(&admin, hosts).await.unwrap();

    f.recorder.reset();
    let out = f
        .get(ADMIN, HOST, json!({"hostids": ids, "output": ["host"], "selectTags": ["tag"]}))
        .await;
    assert_eq!(out.as_array().unwrap().len(), 50);
    assert_eq!(f.recorder.count(), 2);

    f.recorder.reset();
    f.get(
        ADMIN,
        HOST,
        json!({
            "groupids": 3,
            "selectTags": "extend",
            "selectItems": "extend",
            "selectInventory": "extend",
            "selectHostGroups": "count",
        }),
    )
    .await;
    // main query, three child fetches, one grouped count
    assert_eq!(f.recorder.count(), 5);
    let statements = f.recorder.statements();
    assert!(statements[1..].iter().all(|s| s.sql.contains(" IN (")));

    let visible = f.get(OPERATOR, HOST, json!({"hostids": ids, "countOutput": true})).await;
    assert_eq!(visible, json!(0));
    assert_eq!(column(&f.get(ADMIN, HOST, json!({"groupids": 3, "output": ["hostid"]})).await, "hostid").len(), 51);
}
