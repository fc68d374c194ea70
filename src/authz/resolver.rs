use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::rows::parse_uuid;
use crate::errors::AppError;

use super::Principal;

/// Resolve the caller's effective authorization state by traversing
/// user -> user_roles -> roles -> role_permissions -> permissions.
///
/// Permissions union across every held role; an assignment marked global
/// lands in the global set, a group-scoped one in the scoped set, so the
/// applicability distinction survives for the query layer. A user with no
/// assignments resolves to the empty principal.
pub async fn resolve(pool: &SqlitePool, user_id: Uuid) -> Result<Principal, AppError> {
    let mut principal = Principal::new(user_id);

    let grant_rows = sqlx::query(
        r#"
        SELECT r.name AS role_name, p.name AS permission_name, ur.group_id, ur.is_global
        FROM user_roles ur
        INNER JOIN roles r ON r.id = ur.role_id
        INNER JOIN role_permissions rp ON rp.role_id = r.id
        INNER JOIN permissions p ON p.id = rp.permission_id
        WHERE ur.user_id = ?
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    for row in &grant_rows {
        let role_name: String = row.get("role_name");
        let permission: String = row.get("permission_name");
        let group_id: Option<String> = row.get("group_id");
        let is_global: i64 = row.get("is_global");

        principal.roles.insert(role_name);

        match group_id {
            Some(g) if is_global == 0 => {
                principal.scoped_permissions.insert((permission, parse_uuid(&g)?));
            }
            _ => {
                principal.permissions.insert(permission);
            }
        }
    }

    // Membership comes from every group-scoped assignment, including roles
    // that carry no permissions.
    let group_rows = sqlx::query(
        "SELECT DISTINCT group_id FROM user_roles WHERE user_id = ? AND group_id IS NOT NULL",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    for row in &group_rows {
        let group_id: String = row.get("group_id");
        principal.groups.insert(parse_uuid(&group_id)?);
    }

    Ok(principal)
}
