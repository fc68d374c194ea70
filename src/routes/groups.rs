use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz;
use crate::db::rows;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_old};
use crate::jwt::AuthUser;
use crate::models::group::{Group, GroupCreateRequest, GroupUpdateRequest};
use crate::utils::utc_now;

async fn fetch_group(pool: &SqlitePool, id: Uuid) -> AppResult<Group> {
    let row = sqlx::query("SELECT id, name, created_at, updated_at FROM groups WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("group not found"))?;

    rows::group_from_row(&row)
}

/// Case-sensitive exact-match collision check.
async fn ensure_group_name_free(pool: &SqlitePool, name: &str, exclude: Option<Uuid>) -> AppResult<()> {
    let count: i64 = match exclude {
        Some(id) => {
            sqlx::query_scalar("SELECT COUNT(1) FROM groups WHERE name = ? AND id != ?")
                .bind(name)
                .bind(id.to_string())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(1) FROM groups WHERE name = ?")
                .bind(name)
                .fetch_one(pool)
                .await?
        }
    };

    if count > 0 {
        return Err(AppError::conflict(format!("group \"{name}\" already exists")));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/groups",
    tag = "Groups",
    responses((status = 200, description = "All groups", body = [Group])),
    security(("bearerAuth" = []))
)]
pub async fn list_groups(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<Group>>> {
    let group_rows = sqlx::query("SELECT id, name, created_at, updated_at FROM groups ORDER BY name")
        .fetch_all(&state.pool)
        .await?;

    let groups: Vec<Group> = group_rows
        .iter()
        .map(rows::group_from_row)
        .collect::<Result<_, _>>()?;

    Ok(Json(groups))
}

#[utoipa::path(
    post,
    path = "/groups",
    tag = "Groups",
    request_body = GroupCreateRequest,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 409, description = "Group name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<GroupCreateRequest>,
) -> AppResult<(StatusCode, Json<Group>)> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if !principal.can_manage_all_users() {
        return Err(AppError::forbidden("creating groups requires organization-wide authority"));
    }

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("group name is required"));
    }
    ensure_group_name_free(&state.pool, name, None).await?;

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query("INSERT INTO groups (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(name)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&state.pool)
        .await?;

    let group = fetch_group(&state.pool, id).await?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &group);

    Ok((StatusCode::CREATED, Json(group)))
}

#[utoipa::path(
    put,
    path = "/groups/{id}",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = GroupUpdateRequest,
    responses(
        (status = 200, description = "Group renamed", body = Group),
        (status = 403, description = "Caller does not administer this group")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<GroupUpdateRequest>,
) -> AppResult<Json<Group>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if !principal.can_manage_group(id) {
        return Err(AppError::forbidden("you do not administer this group"));
    }

    let before = fetch_group(&state.pool, id).await?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("group name is required"));
    }
    ensure_group_name_free(&state.pool, name, Some(id)).await?;

    let now = utc_now();
    sqlx::query("UPDATE groups SET name = ?, updated_at = ? WHERE id = ?")
        .bind(name)
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let after = fetch_group(&state.pool, id).await?;
    log_activity_with_old(&state.event_bus, "updated", Some(auth.user_id), &after, Some(&before));

    Ok(Json(after))
}

#[utoipa::path(
    delete,
    path = "/groups/{id}",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 409, description = "Group still referenced by users or roles")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if !principal.can_manage_group(id) {
        return Err(AppError::forbidden("you do not administer this group"));
    }

    let group = fetch_group(&state.pool, id).await?;

    let assigned_users: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT user_id) FROM user_roles WHERE group_id = ?",
    )
    .bind(id.to_string())
    .fetch_one(&state.pool)
    .await?;

    if assigned_users > 0 {
        return Err(AppError::referential_integrity(format!(
            "cannot delete group: {assigned_users} user(s) are currently assigned"
        )));
    }

    let scoped_roles: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM group_roles WHERE group_id = ?")
        .bind(id.to_string())
        .fetch_one(&state.pool)
        .await?;

    if scoped_roles > 0 {
        return Err(AppError::referential_integrity(format!(
            "cannot delete group: {scoped_roles} role(s) are currently scoped to it"
        )));
    }

    sqlx::query("DELETE FROM groups WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &group);

    Ok(StatusCode::NO_CONTENT)
}
