#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use std::sync::Arc;

use apikit_db::{Api, CallerContext, ConnectOpts, DbHandle, Id, RecordingRunner, SqliteRunner};
use apikit_inventory::{build_api, init, load_caller};
use serde_json::Value;

pub const ADMIN: Id = 1;
pub const OPERATOR: Id = 2;
pub const NETADMIN: Id = 3;
pub const GUEST: Id = 4;

pub struct Fixture {
    pub db: DbHandle,
    pub api: Arc<Api>,
    pub recorder: Arc<RecordingRunner<SqliteRunner>>,
}

impl Fixture {
    pub async fn caller(&self, userid: Id) -> CallerContext {
        load_caller(&self.db, userid).await.unwrap()
    }

    pub async fn get(&self, userid: Id, entity: &str, options: Value) -> Value {
        let caller = self.caller(userid).await;
        self.api
            .get(&caller, entity, &options)
            .await
            .unwrap()
            .into_value()
    }
}

/// Seeded in-memory inventory whose statements are recorded.
pub async fn fixture() -> Fixture {
    let opts = ConnectOpts {
        max_conns: Some(1),
        ..Default::default()
    };
    let db = DbHandle::connect("sqlite::memory:", opts)
        .await
        .expect("Failed to connect to database");
    init(&db, true).await.expect("Failed to load schema");

    let recorder = Arc::new(RecordingRunner::new(SqliteRunner::from_handle(&db)));
    let api = Arc::new(build_api(recorder.clone()));
    Fixture { db, api, recorder }
}

/// Values of `field` across a list result.
pub fn column(rows: &Value, field: &str) -> Vec<i64> {
    rows.as_array()
        .unwrap()
        .iter()
        .map(|row| row[field].as_i64().unwrap())
        .collect()
}
