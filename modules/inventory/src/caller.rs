//! Caller resolution from the users tables.

use apikit_db::runner::fetch_rows;
use apikit_db::value::id_of;
use apikit_db::{ApiError, ApiResult, CallerContext, DbHandle, Id, SqlValue, Statement, UserType};

/// Build the request context of `userid` with its user group memberships.
///
/// # Errors
/// Returns a parameter error for unknown users or corrupt user types.
pub async fn load_caller(db: &DbHandle, userid: Id) -> ApiResult<CallerContext> {
    let users = fetch_rows(
        db.pool(),
        &Statement::new("SELECT type FROM users WHERE userid=?", vec![SqlValue::Int(userid)]),
    )
    .await?;
    let raw_type = users
        .first()
        .and_then(|row| row.get("type"))
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| ApiError::parameters(format!("User with ID \"{userid}\" does not exist.")))?;
    let user_type = UserType::try_from(raw_type).map_err(ApiError::internal)?;

    let groups = fetch_rows(
        db.pool(),
        &Statement::new(
            "SELECT usrgrpid FROM users_groups WHERE userid=? ORDER BY usrgrpid",
            vec![SqlValue::Int(userid)],
        ),
    )
    .await?;

    let caller = CallerContext::builder()
        .user_id(userid)
        .user_type(user_type)
        .user_groups(groups.iter().filter_map(|row| row.get("usrgrpid").and_then(id_of)))
        .build();
    tracing::debug!(userid, ?user_type, groups = caller.user_group_ids().len(), "caller loaded");
    Ok(caller)
}
