use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// Role with its permission names and group availability attached, as the
/// admin UI consumes it.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoleDetail {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub permissions: Vec<String>,
    pub groups: Vec<GroupRole>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creating a role attaches permissions (by catalog name) and group
/// availability in one transactional write.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "club_treasurer")]
    pub name: String,
    #[schema(example = "Reviews reimbursements for one club")]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Groups the role is available within; empty plus `is_global` = false
    /// makes the role unassignable until scoped.
    #[serde(default)]
    pub group_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_global: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Full replacement set when present; permissions are never merged.
    pub permissions: Option<Vec<String>>,
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub tier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str { "role_permission" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionToRoleRequest {
    #[schema(example = "view_club_requests")]
    pub permission: String,
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    /// Present when the assignment is scoped to a single group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    pub is_global: bool,
    pub created_at: DateTime<Utc>,
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str { "user_role" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
    /// Scope the assignment to one group; mutually exclusive with `is_global`.
    pub group_id: Option<Uuid>,
    #[serde(default)]
    pub is_global: bool,
}

// =============================================================================
// GROUP-ROLE AVAILABILITY
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupRole {
    pub role_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    pub is_global: bool,
    pub created_at: DateTime<Utc>,
}

impl Loggable for GroupRole {
    fn entity_type() -> &'static str { "group_role" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachGroupRoleRequest {
    pub group_id: Option<Uuid>,
    #[serde(default)]
    pub is_global: bool,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub roles: Vec<String>,
    pub permissions: Vec<EffectivePermission>,
    pub group_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermission {
    pub name: String,
    /// Name of the role the permission came from.
    pub role_name: String,
    /// Group the grant is scoped to; absent for global assignments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
}
