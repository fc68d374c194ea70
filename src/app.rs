use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::notify::NotifierSet;
use crate::routes::{analytics, auth, budgets, groups, health, notify, requests, roles, users};

/// Tunable policy switches. Whether a Reimbursed request locks against
/// further status edits was left open by the original workflow, so it is a
/// deployment choice rather than a hard rule.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub reimbursed_locked: bool,
}

impl Policy {
    pub fn from_env() -> Self {
        let reimbursed_locked = std::env::var("REIMBURSED_LOCKED")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self { reimbursed_locked }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
    pub notifiers: Arc<NotifierSet>,
    pub policy: Policy,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus, policy: Policy) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
            notifiers: Arc::new(NotifierSet::default()),
            policy,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let policy = Policy::from_env();

    let (event_bus, event_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(event_rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, event_bus, policy);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let request_routes = Router::new()
        .route("/", get(requests::list_requests))
        .route("/", post(requests::create_request))
        .route("/:id", get(requests::get_request))
        .route("/:id/status", put(requests::update_status));

    let budget_routes = Router::new()
        .route("/", get(budgets::list_budget_forms))
        .route("/", post(budgets::create_budget_form))
        .route("/:id", get(budgets::get_budget_form))
        .route("/:id/status", put(budgets::update_status))
        .route("/:id/rows", get(budgets::list_rows));

    let group_routes = Router::new()
        .route("/", get(groups::list_groups).post(groups::create_group))
        .route("/:id", put(groups::update_group).delete(groups::delete_group));

    let role_routes = Router::new()
        .route("/", get(roles::list_roles).post(roles::create_role))
        .route("/:id", get(roles::get_role).put(roles::update_role).delete(roles::delete_role))
        .route("/:id/permissions", get(roles::list_role_permissions).post(roles::assign_permission))
        .route("/:id/permissions/:permission", delete(roles::revoke_permission))
        .route("/:id/groups", get(roles::list_role_groups).post(roles::attach_group));

    let user_routes = Router::new()
        .route("/", get(users::list_users))
        .route("/:id/roles", get(users::list_user_roles).post(users::assign_role))
        .route("/:id/roles/:user_role_id", delete(users::revoke_role))
        .route("/:id/effective-permissions", get(users::effective_permissions));

    let notify_routes = Router::new()
        .route("/email", post(notify::send_email))
        .route("/sms", post(notify::send_sms));

    let router = Router::new()
        .nest("/auth", auth_routes)
        .nest("/requests", request_routes)
        .nest("/budgets", budget_routes)
        .nest("/groups", group_routes)
        .nest("/roles", role_routes)
        .nest("/users", user_routes)
        .route("/permissions", get(roles::list_permissions))
        .route("/analytics/dashboard", get(analytics::dashboard))
        .nest("/notify", notify_routes)
        .route("/api/health", get(health::health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
