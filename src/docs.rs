//! OpenAPI document assembly.
//!
//! Path metadata comes from the per-handler `#[utoipa::path]` annotations;
//! this module registers the component schemas and patches in the bearer
//! auth scheme and server URL that the derive cannot express.

use utoipa::OpenApi;

use crate::analytics;
use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::auth::register,
        routes::auth::login,
        routes::auth::me,
        routes::auth::logout,
        routes::requests::list_requests,
        routes::requests::create_request,
        routes::requests::get_request,
        routes::requests::update_status,
        routes::budgets::list_budget_forms,
        routes::budgets::create_budget_form,
        routes::budgets::get_budget_form,
        routes::budgets::update_status,
        routes::budgets::list_rows,
        routes::groups::list_groups,
        routes::groups::create_group,
        routes::groups::update_group,
        routes::groups::delete_group,
        routes::roles::list_permissions,
        routes::roles::list_roles,
        routes::roles::create_role,
        routes::roles::get_role,
        routes::roles::update_role,
        routes::roles::delete_role,
        routes::roles::list_role_permissions,
        routes::roles::assign_permission,
        routes::roles::revoke_permission,
        routes::roles::list_role_groups,
        routes::roles::attach_group,
        routes::users::list_users,
        routes::users::list_user_roles,
        routes::users::assign_role,
        routes::users::revoke_role,
        routes::users::effective_permissions,
        routes::analytics::dashboard,
        routes::notify::send_email,
        routes::notify::send_sms,
        routes::health::health,
    ),
    components(
        schemas(
            models::user::User,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::RegisterRequest,
            models::user::UserWithGroups,
            models::group::Group,
            models::group::GroupCreateRequest,
            models::group::GroupUpdateRequest,
            models::rbac::Role,
            models::rbac::RoleDetail,
            models::rbac::RoleCreateRequest,
            models::rbac::RoleUpdateRequest,
            models::rbac::Permission,
            models::rbac::RolePermission,
            models::rbac::AssignPermissionToRoleRequest,
            models::rbac::UserRole,
            models::rbac::AssignRoleRequest,
            models::rbac::GroupRole,
            models::rbac::AttachGroupRoleRequest,
            models::rbac::EffectivePermissions,
            models::rbac::EffectivePermission,
            models::request::PaymentRequest,
            models::request::PaymentRequestCreate,
            models::request::RequestStatus,
            models::request::StatusUpdateRequest,
            models::budget::BudgetForm,
            models::budget::BudgetFormCreate,
            models::budget::BudgetFormRow,
            analytics::Dashboard,
            analytics::MonthlyPoint,
            analytics::StatusSlice,
            analytics::GroupSlice,
            analytics::TimeframePoint,
            analytics::BudgetLineSlice,
            analytics::DayOfWeekPoint,
            analytics::TopRequester,
            analytics::BudgetComparisonRow,
            analytics::SeasonSlice,
            analytics::TimelinePoint,
            routes::notify::NotifySendRequest,
            routes::notify::NotifyResponse,
            routes::health::HealthResponse,
        )
    ),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Requests", description = "Payment / reimbursement requests"),
        (name = "Budgets", description = "Annual budget forms"),
        (name = "Groups", description = "Club / team administration"),
        (name = "RBAC", description = "Roles and permissions"),
        (name = "Users", description = "User administration"),
        (name = "Analytics", description = "Spending summaries"),
        (name = "Notifications", description = "Outbound email / SMS"),
        (name = "Health", description = "Service health"),
    )
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
    let mut doc = serde_json::to_value(ApiDoc::openapi())?;

    ensure_security_scheme(&mut doc);

    if doc.get("servers").is_none() {
        doc["servers"] = serde_json::json!([
            { "url": format!("http://localhost:{}", port) }
        ]);
    }

    Ok(serde_json::from_value(doc)?)
}

fn ensure_security_scheme(doc: &mut serde_json::Value) {
    if doc.get("components").is_none() {
        doc["components"] = serde_json::json!({});
    }

    if let Some(components) = doc.get_mut("components").and_then(|c| c.as_object_mut()) {
        let schemes = components
            .entry("securitySchemes")
            .or_insert_with(|| serde_json::json!({}));
        if let Some(schemes) = schemes.as_object_mut() {
            schemes.insert(
                "bearerAuth".to_string(),
                serde_json::json!({
                    "type": "http",
                    "scheme": "bearer",
                    "bearerFormat": "JWT"
                }),
            );
        }
    }

    if doc.get("security").is_none() {
        doc["security"] = serde_json::json!([{ "bearerAuth": [] }]);
    }
}
