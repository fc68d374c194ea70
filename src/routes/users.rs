//! User administration: listing, role assignment, effective permissions.
//!
//! Club-level administrators only reach users whose group membership
//! intersects their own administered groups; organization-wide
//! administrators reach everyone.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, is_protected, Principal};
use crate::db::rows;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::rbac::{
    AssignRoleRequest, EffectivePermission, EffectivePermissions, UserRole,
};
use crate::models::user::UserWithGroups;
use crate::utils::utc_now;

async fn fetch_user_groups(pool: &SqlitePool, user_id: Uuid) -> AppResult<HashSet<Uuid>> {
    let group_rows = sqlx::query(
        "SELECT DISTINCT group_id FROM user_roles WHERE user_id = ? AND group_id IS NOT NULL",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut groups = HashSet::new();
    for row in &group_rows {
        let group_id: String = row.get("group_id");
        groups.insert(rows::parse_uuid(&group_id)?);
    }
    Ok(groups)
}

/// Cross-group modification gate. A club-level administrator may touch a
/// user whose groups intersect their own; a user with no memberships yet can
/// be onboarded because every scoped assignment such a caller can make is
/// already restricted to their own groups.
async fn ensure_can_touch_user(
    pool: &SqlitePool,
    principal: &Principal,
    target: Uuid,
) -> AppResult<()> {
    if principal.can_manage_all_users() || principal.can_manage_all_roles() {
        return Ok(());
    }
    if !principal.can_manage_users() && !principal.can_manage_roles() {
        return Err(AppError::forbidden("managing users requires an administrative permission"));
    }

    let target_groups = fetch_user_groups(pool, target).await?;
    if !target_groups.is_empty() && !principal.can_modify_user_in(&target_groups) {
        return Err(AppError::forbidden("user is outside your administered groups"));
    }

    Ok(())
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses(
        (status = 200, description = "Users visible to the caller", body = [UserWithGroups]),
        (status = 403, description = "Caller may not manage users")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<UserWithGroups>>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if !principal.can_manage_users() {
        return Err(AppError::forbidden("listing users requires a user-management permission"));
    }

    let user_rows = sqlx::query(
        "SELECT id, name, email, created_at FROM users WHERE deleted_at IS NULL ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let mut users = Vec::new();
    for row in &user_rows {
        let id = rows::parse_uuid(&row.get::<String, _>("id"))?;
        let groups = fetch_user_groups(&state.pool, id).await?;

        // club-level admins see only users sharing one of their groups
        if !principal.can_manage_all_users()
            && !groups.iter().any(|g| principal.groups.contains(g))
        {
            continue;
        }

        users.push(UserWithGroups {
            id,
            name: row.get("name"),
            email: row.get("email"),
            group_ids: groups.into_iter().collect(),
            created_at: rows::parse_datetime(&row.get::<String, _>("created_at"))?,
        });
    }

    Ok(Json(users))
}

#[utoipa::path(
    get,
    path = "/users/{id}/roles",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Role assignments held by the user", body = [UserRole])),
    security(("bearerAuth" = []))
)]
pub async fn list_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<UserRole>>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if auth.user_id != id {
        ensure_can_touch_user(&state.pool, &principal, id).await?;
    }

    let assignment_rows = sqlx::query(
        "SELECT id, user_id, role_id, group_id, is_global, created_at FROM user_roles WHERE user_id = ?",
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let assignments: Vec<UserRole> = assignment_rows
        .iter()
        .map(rows::user_role_from_row)
        .collect::<Result<_, _>>()?;

    Ok(Json(assignments))
}

#[utoipa::path(
    post,
    path = "/users/{id}/roles",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned", body = UserRole),
        (status = 403, description = "Escalation or cross-group assignment rejected")
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRoleRequest>,
) -> AppResult<(StatusCode, Json<UserRole>)> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    ensure_can_touch_user(&state.pool, &principal, id).await?;

    if payload.is_global && payload.group_id.is_some() {
        return Err(AppError::bad_request("an assignment is either global or group-scoped, not both"));
    }
    if !payload.is_global && payload.group_id.is_none() {
        return Err(AppError::bad_request("either group_id or is_global is required"));
    }
    if !principal.can_scope_role_to(payload.group_id, payload.is_global) {
        return Err(AppError::forbidden("you may only assign roles within groups you administer"));
    }

    // target user must exist
    super::auth::fetch_user_by_id(&state.pool, id).await?;

    // assigning a role that carries protected permissions requires
    // organization-wide role authority
    let permission_names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT p.name
        FROM permissions p
        INNER JOIN role_permissions rp ON p.id = rp.permission_id
        WHERE rp.role_id = ?
        "#,
    )
    .bind(payload.role_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    if permission_names.iter().any(|p| is_protected(p)) && !principal.can_manage_all_roles() {
        return Err(AppError::forbidden(
            "assigning a role with protected permissions requires organization-wide authority",
        ));
    }

    // the role must be available where the assignment lands
    let availability: i64 = if payload.is_global {
        sqlx::query_scalar("SELECT COUNT(1) FROM group_roles WHERE role_id = ? AND is_global = 1")
            .bind(payload.role_id.to_string())
            .fetch_one(&state.pool)
            .await?
    } else {
        sqlx::query_scalar(
            "SELECT COUNT(1) FROM group_roles WHERE role_id = ? AND (is_global = 1 OR group_id = ?)",
        )
        .bind(payload.role_id.to_string())
        .bind(payload.group_id.map(|g| g.to_string()))
        .fetch_one(&state.pool)
        .await?
    };

    if availability == 0 {
        return Err(AppError::bad_request("role is not available to this group"));
    }

    let assignment_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO user_roles (id, user_id, role_id, group_id, is_global, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(assignment_id.to_string())
    .bind(id.to_string())
    .bind(payload.role_id.to_string())
    .bind(payload.group_id.map(|g| g.to_string()))
    .bind(payload.is_global as i64)
    .bind(now.to_rfc3339())
    .execute(&state.pool)
    .await?;

    let assignment = UserRole {
        id: assignment_id,
        user_id: id,
        role_id: payload.role_id,
        group_id: payload.group_id,
        is_global: payload.is_global,
        created_at: now,
    };
    log_activity(&state.event_bus, "assigned", Some(auth.user_id), &assignment);

    Ok((StatusCode::CREATED, Json(assignment)))
}

#[utoipa::path(
    delete,
    path = "/users/{id}/roles/{user_role_id}",
    tag = "Users",
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("user_role_id" = Uuid, Path, description = "Assignment id"),
    ),
    responses((status = 204, description = "Assignment revoked")),
    security(("bearerAuth" = []))
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, user_role_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    ensure_can_touch_user(&state.pool, &principal, id).await?;

    let row = sqlx::query(
        "SELECT id, user_id, role_id, group_id, is_global, created_at FROM user_roles WHERE id = ? AND user_id = ?",
    )
    .bind(user_role_id.to_string())
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("role assignment not found"))?;

    let assignment = rows::user_role_from_row(&row)?;

    // club-level callers may only revoke assignments inside their own groups
    if !principal.can_manage_all_users() && !principal.can_manage_all_roles() {
        match assignment.group_id {
            Some(g) if principal.groups.contains(&g) => {}
            _ => {
                return Err(AppError::forbidden(
                    "you may only revoke assignments within groups you administer",
                ))
            }
        }
    }

    sqlx::query("DELETE FROM user_roles WHERE id = ?")
        .bind(user_role_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "revoked", Some(auth.user_id), &assignment);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/users/{id}/effective-permissions",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Computed effective permissions", body = EffectivePermissions)),
    security(("bearerAuth" = []))
)]
pub async fn effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissions>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if auth.user_id != id {
        ensure_can_touch_user(&state.pool, &principal, id).await?;
    }

    let grant_rows = sqlx::query(
        r#"
        SELECT r.name AS role_name, p.name AS permission_name, ur.group_id, ur.is_global
        FROM user_roles ur
        INNER JOIN roles r ON r.id = ur.role_id
        INNER JOIN role_permissions rp ON rp.role_id = r.id
        INNER JOIN permissions p ON p.id = rp.permission_id
        WHERE ur.user_id = ?
        ORDER BY p.name, r.name
        "#,
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let mut permissions = Vec::new();
    let mut roles = std::collections::BTreeSet::new();
    for row in &grant_rows {
        let role_name: String = row.get("role_name");
        let group_id: Option<String> = row.get("group_id");
        let is_global: i64 = row.get("is_global");

        roles.insert(role_name.clone());
        permissions.push(EffectivePermission {
            name: row.get("permission_name"),
            role_name,
            group_id: match group_id {
                Some(g) if is_global == 0 => Some(rows::parse_uuid(&g)?),
                _ => None,
            },
        });
    }

    let group_ids = fetch_user_groups(&state.pool, id).await?;

    Ok(Json(EffectivePermissions {
        user_id: id,
        roles: roles.into_iter().collect(),
        permissions,
        group_ids: group_ids.into_iter().collect(),
    }))
}
