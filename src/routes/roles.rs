//! Role administration.
//!
//! Role creation attaches permissions and group availability inside one
//! transaction, so a failed attach never leaves an orphaned role behind.
//! Escalation gates: club-level role managers can only grant permissions
//! they hold themselves, never protected-tier ones, and can only scope or
//! modify roles within groups they administer.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, is_known_permission, Principal};
use crate::db::rows;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_old};
use crate::jwt::AuthUser;
use crate::models::rbac::{
    AssignPermissionToRoleRequest, AttachGroupRoleRequest, GroupRole, Permission, Role,
    RoleCreateRequest, RoleDetail, RolePermission, RoleUpdateRequest,
};
use crate::utils::utc_now;

// =============================================================================
// HELPERS
// =============================================================================

async fn fetch_role(pool: &SqlitePool, id: Uuid) -> AppResult<Role> {
    let row = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM roles WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("role not found"))?;

    rows::role_from_row(&row)
}

async fn fetch_role_permission_names(pool: &SqlitePool, role_id: Uuid) -> AppResult<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT p.name
        FROM permissions p
        INNER JOIN role_permissions rp ON p.id = rp.permission_id
        WHERE rp.role_id = ?
        ORDER BY p.name
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(names)
}

async fn fetch_role_groups(pool: &SqlitePool, role_id: Uuid) -> AppResult<Vec<GroupRole>> {
    let group_rows = sqlx::query(
        "SELECT role_id, group_id, is_global, created_at FROM group_roles WHERE role_id = ?",
    )
    .bind(role_id.to_string())
    .fetch_all(pool)
    .await?;

    group_rows.iter().map(rows::group_role_from_row).collect()
}

async fn role_detail(pool: &SqlitePool, role: Role) -> AppResult<RoleDetail> {
    let permissions = fetch_role_permission_names(pool, role.id).await?;
    let groups = fetch_role_groups(pool, role.id).await?;

    Ok(RoleDetail {
        id: role.id,
        name: role.name,
        description: role.description,
        permissions,
        groups,
        created_at: role.created_at,
        updated_at: role.updated_at,
    })
}

async fn ensure_role_name_free(pool: &SqlitePool, name: &str, exclude: Option<Uuid>) -> AppResult<()> {
    let count: i64 = match exclude {
        Some(id) => {
            sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE name = ? AND id != ?")
                .bind(name)
                .bind(id.to_string())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE name = ?")
                .bind(name)
                .fetch_one(pool)
                .await?
        }
    };

    if count > 0 {
        return Err(AppError::conflict(format!("role \"{name}\" already exists")));
    }
    Ok(())
}

/// Cross-group gate for touching an existing role: organization-wide role
/// managers always pass; club-level ones only when the role is non-global and
/// its availability groups intersect their own.
async fn ensure_can_touch_role(
    pool: &SqlitePool,
    principal: &Principal,
    role_id: Uuid,
) -> AppResult<()> {
    if principal.can_manage_all_roles() {
        return Ok(());
    }
    if !principal.can_manage_roles() {
        return Err(AppError::forbidden("managing roles requires a role-management permission"));
    }

    let groups = fetch_role_groups(pool, role_id).await?;
    if groups.iter().any(|g| g.is_global) {
        return Err(AppError::forbidden("global roles require organization-wide authority"));
    }

    let role_groups: HashSet<Uuid> = groups.iter().filter_map(|g| g.group_id).collect();
    if !principal.can_modify_user_in(&role_groups) {
        return Err(AppError::forbidden("role is outside your administered groups"));
    }

    Ok(())
}

fn ensure_grantable(principal: &Principal, permission: &str) -> AppResult<()> {
    if !is_known_permission(permission) {
        return Err(AppError::bad_request(format!("unknown permission \"{permission}\"")));
    }
    if !principal.can_grant_permission(permission) {
        return Err(AppError::forbidden(format!(
            "you may not grant the \"{permission}\" permission"
        )));
    }
    Ok(())
}

// =============================================================================
// PERMISSION CATALOG
// =============================================================================

#[utoipa::path(
    get,
    path = "/permissions",
    tag = "RBAC",
    responses((status = 200, description = "The permission catalog", body = [Permission])),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<Vec<Permission>>> {
    let permission_rows = sqlx::query(
        "SELECT id, name, tier, description, created_at FROM permissions ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let permissions: Vec<Permission> = permission_rows
        .iter()
        .map(rows::permission_from_row)
        .collect::<Result<_, _>>()?;

    Ok(Json(permissions))
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/roles",
    tag = "RBAC",
    responses((status = 200, description = "List of roles", body = [Role])),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<Role>>> {
    let role_rows = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM roles ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let roles: Vec<Role> = role_rows
        .iter()
        .map(rows::role_from_row)
        .collect::<Result<_, _>>()?;

    Ok(Json(roles))
}

#[utoipa::path(
    post,
    path = "/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = RoleDetail),
        (status = 403, description = "Escalation or scope rejected"),
        (status = 409, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<RoleDetail>)> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if !principal.can_manage_roles() {
        return Err(AppError::forbidden("creating roles requires a role-management permission"));
    }

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("role name is required"));
    }
    ensure_role_name_free(&state.pool, name, None).await?;

    for permission in &payload.permissions {
        ensure_grantable(&principal, permission)?;
    }

    if payload.is_global && !principal.can_scope_role_to(None, true) {
        return Err(AppError::forbidden("global roles require organization-wide authority"));
    }
    for group_id in &payload.group_ids {
        if !principal.can_scope_role_to(Some(*group_id), false) {
            return Err(AppError::forbidden("you may only scope roles to groups you administer"));
        }
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    // role + permissions + availability commit or roll back together
    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(&payload.description)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for permission in &payload.permissions {
        sqlx::query(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) \
             SELECT ?, id, ? FROM permissions WHERE name = ?",
        )
        .bind(id.to_string())
        .bind(now.to_rfc3339())
        .bind(permission)
        .execute(&mut *tx)
        .await?;
    }

    if payload.is_global {
        sqlx::query(
            "INSERT INTO group_roles (role_id, group_id, is_global, created_at) VALUES (?, NULL, 1, ?)",
        )
        .bind(id.to_string())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }
    for group_id in &payload.group_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO group_roles (role_id, group_id, is_global, created_at) VALUES (?, ?, 0, ?)",
        )
        .bind(id.to_string())
        .bind(group_id.to_string())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let role = fetch_role(&state.pool, id).await?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &role);

    let detail = role_detail(&state.pool, role).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

#[utoipa::path(
    get,
    path = "/roles/{id}",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role with permissions and scoping", body = RoleDetail),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RoleDetail>> {
    let role = fetch_role(&state.pool, id).await?;
    let detail = role_detail(&state.pool, role).await?;
    Ok(Json(detail))
}

#[utoipa::path(
    put,
    path = "/roles/{id}",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleDetail),
        (status = 403, description = "Escalation or scope rejected")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RoleUpdateRequest>,
) -> AppResult<Json<RoleDetail>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    ensure_can_touch_role(&state.pool, &principal, id).await?;

    let before = fetch_role(&state.pool, id).await?;

    let name = match payload.name.as_deref() {
        Some(n) => {
            let n = n.trim();
            if n.is_empty() {
                return Err(AppError::bad_request("role name is required"));
            }
            ensure_role_name_free(&state.pool, n, Some(id)).await?;
            n.to_string()
        }
        None => before.name.clone(),
    };
    let description = payload.description.clone().or_else(|| before.description.clone());

    if let Some(permissions) = &payload.permissions {
        for permission in permissions {
            ensure_grantable(&principal, permission)?;
        }
    }

    let now = utc_now();
    let mut tx = state.pool.begin().await?;

    sqlx::query("UPDATE roles SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    if let Some(permissions) = &payload.permissions {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        for permission in permissions {
            sqlx::query(
                "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) \
                 SELECT ?, id, ? FROM permissions WHERE name = ?",
            )
            .bind(id.to_string())
            .bind(now.to_rfc3339())
            .bind(permission)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    let after = fetch_role(&state.pool, id).await?;
    log_activity_with_old(&state.event_bus, "updated", Some(auth.user_id), &after, Some(&before));

    let detail = role_detail(&state.pool, after).await?;
    Ok(Json(detail))
}

#[utoipa::path(
    delete,
    path = "/roles/{id}",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 409, description = "Role still assigned to users")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    ensure_can_touch_role(&state.pool, &principal, id).await?;

    let role = fetch_role(&state.pool, id).await?;

    let assigned: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM user_roles WHERE role_id = ?")
        .bind(id.to_string())
        .fetch_one(&state.pool)
        .await?;

    if assigned > 0 {
        return Err(AppError::referential_integrity(format!(
            "cannot delete role: {assigned} user(s) are currently assigned"
        )));
    }

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &role);

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ROLE-PERMISSION ENDPOINTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/roles/{id}/permissions",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role id")),
    responses((status = 200, description = "Permission names held by the role", body = [String])),
    security(("bearerAuth" = []))
)]
pub async fn list_role_permissions(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<String>>> {
    fetch_role(&state.pool, id).await?;
    let names = fetch_role_permission_names(&state.pool, id).await?;
    Ok(Json(names))
}

#[utoipa::path(
    post,
    path = "/roles/{id}/permissions",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = AssignPermissionToRoleRequest,
    responses(
        (status = 201, description = "Permission assigned"),
        (status = 403, description = "Escalation rejected")
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignPermissionToRoleRequest>,
) -> AppResult<StatusCode> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    ensure_can_touch_role(&state.pool, &principal, id).await?;
    ensure_grantable(&principal, &payload.permission)?;

    fetch_role(&state.pool, id).await?;

    let permission_id: Option<String> = sqlx::query_scalar("SELECT id FROM permissions WHERE name = ?")
        .bind(&payload.permission)
        .fetch_optional(&state.pool)
        .await?;
    let permission_id = permission_id
        .ok_or_else(|| AppError::bad_request(format!("unknown permission \"{}\"", payload.permission)))?;

    let now = utc_now();
    sqlx::query(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&permission_id)
    .bind(now.to_rfc3339())
    .execute(&state.pool)
    .await?;

    let assignment = RolePermission {
        role_id: id,
        permission_id: rows::parse_uuid(&permission_id)?,
        created_at: now,
    };
    log_activity(&state.event_bus, "assigned", Some(auth.user_id), &assignment);

    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    delete,
    path = "/roles/{id}/permissions/{permission}",
    tag = "RBAC",
    params(
        ("id" = Uuid, Path, description = "Role id"),
        ("permission" = String, Path, description = "Permission name"),
    ),
    responses((status = 204, description = "Permission removed from role")),
    security(("bearerAuth" = []))
)]
pub async fn revoke_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, permission)): Path<(Uuid, String)>,
) -> AppResult<StatusCode> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    ensure_can_touch_role(&state.pool, &principal, id).await?;

    let permission_id: Option<String> = sqlx::query_scalar("SELECT id FROM permissions WHERE name = ?")
        .bind(&permission)
        .fetch_optional(&state.pool)
        .await?;
    let permission_id = permission_id
        .ok_or_else(|| AppError::bad_request(format!("unknown permission \"{permission}\"")))?;

    sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
        .bind(id.to_string())
        .bind(&permission_id)
        .execute(&state.pool)
        .await?;

    let assignment = RolePermission {
        role_id: id,
        permission_id: rows::parse_uuid(&permission_id)?,
        created_at: utc_now(),
    };
    log_activity(&state.event_bus, "revoked", Some(auth.user_id), &assignment);

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ROLE-GROUP AVAILABILITY
// =============================================================================

#[utoipa::path(
    get,
    path = "/roles/{id}/groups",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role id")),
    responses((status = 200, description = "Groups the role is available within", body = [GroupRole])),
    security(("bearerAuth" = []))
)]
pub async fn list_role_groups(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<GroupRole>>> {
    fetch_role(&state.pool, id).await?;
    let groups = fetch_role_groups(&state.pool, id).await?;
    Ok(Json(groups))
}

#[utoipa::path(
    post,
    path = "/roles/{id}/groups",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = AttachGroupRoleRequest,
    responses(
        (status = 201, description = "Role made available to the group"),
        (status = 403, description = "Scope rejected")
    ),
    security(("bearerAuth" = []))
)]
pub async fn attach_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AttachGroupRoleRequest>,
) -> AppResult<StatusCode> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    ensure_can_touch_role(&state.pool, &principal, id).await?;

    if !principal.can_scope_role_to(payload.group_id, payload.is_global) {
        return Err(AppError::forbidden("you may only scope roles to groups you administer"));
    }
    if !payload.is_global && payload.group_id.is_none() {
        return Err(AppError::bad_request("either group_id or is_global is required"));
    }

    fetch_role(&state.pool, id).await?;

    let now = utc_now();
    sqlx::query(
        "INSERT OR IGNORE INTO group_roles (role_id, group_id, is_global, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(payload.group_id.map(|g| g.to_string()))
    .bind(payload.is_global as i64)
    .bind(now.to_rfc3339())
    .execute(&state.pool)
    .await?;

    let attachment = GroupRole {
        role_id: id,
        group_id: payload.group_id,
        is_global: payload.is_global,
        created_at: now,
    };
    log_activity(&state.event_bus, "attached", Some(auth.user_id), &attachment);

    Ok(StatusCode::CREATED)
}
