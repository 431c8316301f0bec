//! Bundled DDL and demo data.

use apikit_db::{ApiResult, DbHandle};

pub const SCHEMA: &str = include_str!("sql/schema.sql");
pub const SEED: &str = include_str!("sql/seed.sql");

/// Create the tables and, optionally, load the demo data set.
///
/// # Errors
/// Returns the driver error if a statement fails; seeding a non-empty
/// database violates unique keys.
pub async fn init(db: &DbHandle, seed: bool) -> ApiResult<()> {
    sqlx::raw_sql(SCHEMA).execute(db.pool()).await?;
    if seed {
        sqlx::raw_sql(SEED).execute(db.pool()).await?;
    }
    tracing::info!(seed, "inventory schema ready");
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use apikit_db::ConnectOpts;

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn schema_loads_without_seed() {
        let opts = ConnectOpts {
            max_conns: Some(1),
            ..Default::default()
        };
        let db = DbHandle::connect("sqlite::memory:", opts).await.unwrap();
        init(&db, false).await.unwrap();

        let (hosts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hosts")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(hosts, 0);
        assert!(logs_contain("inventory schema ready"));
    }
}
