use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, ReadScope};
use crate::db::rows;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity_with_old;
use crate::jwt::AuthUser;
use crate::models::budget::{BudgetForm, BudgetFormCreate, BudgetFormRow};
use crate::models::request::{RequestStatus, StatusUpdateRequest};
use crate::utils::utc_now;

const FORM_COLUMNS: &str =
    "id, club_name, group_id, user_id, requested_funding_cad, status, created_at, updated_at";

async fn fetch_scoped_forms(pool: &SqlitePool, scope: &ReadScope) -> AppResult<Vec<BudgetForm>> {
    let rows: Vec<SqliteRow> = match scope {
        ReadScope::All => {
            sqlx::query(&format!(
                "SELECT {FORM_COLUMNS} FROM budget_forms ORDER BY created_at DESC"
            ))
            .fetch_all(pool)
            .await?
        }
        ReadScope::Groups(groups) => {
            if groups.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; groups.len()].join(", ");
            let sql = format!(
                "SELECT {FORM_COLUMNS} FROM budget_forms WHERE group_id IN ({placeholders}) ORDER BY created_at DESC"
            );
            let mut query = sqlx::query(&sql);
            for group in groups {
                query = query.bind(group.to_string());
            }
            query.fetch_all(pool).await?
        }
        ReadScope::Own(user_id) => {
            sqlx::query(&format!(
                "SELECT {FORM_COLUMNS} FROM budget_forms WHERE user_id = ? ORDER BY created_at DESC"
            ))
            .bind(user_id.to_string())
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(rows::budget_form_from_row).collect()
}

async fn fetch_form(pool: &SqlitePool, id: Uuid) -> AppResult<BudgetForm> {
    let row = sqlx::query(&format!("SELECT {FORM_COLUMNS} FROM budget_forms WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("budget form not found"))?;

    rows::budget_form_from_row(&row)
}

#[utoipa::path(
    get,
    path = "/budgets",
    tag = "Budgets",
    responses((status = 200, description = "Budget forms visible to the caller", body = [BudgetForm])),
    security(("bearerAuth" = []))
)]
pub async fn list_budget_forms(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<BudgetForm>>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    let forms = fetch_scoped_forms(&state.pool, &principal.read_scope()).await?;
    Ok(Json(forms))
}

#[utoipa::path(
    post,
    path = "/budgets",
    tag = "Budgets",
    request_body = BudgetFormCreate,
    responses(
        (status = 201, description = "Budget form submitted", body = BudgetForm),
        (status = 403, description = "Caller may not submit budget forms")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_budget_form(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<BudgetFormCreate>,
) -> AppResult<(StatusCode, Json<BudgetForm>)> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if !principal.can_create_requests() {
        return Err(AppError::forbidden("submitting budget forms requires the create_requests permission"));
    }

    if payload.club_name.trim().is_empty() {
        return Err(AppError::bad_request("club name is required"));
    }
    if !payload.requested_funding_cad.is_finite() || payload.requested_funding_cad < 0.0 {
        return Err(AppError::bad_request("requested funding must be a non-negative number"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO budget_forms (id, club_name, group_id, user_id, requested_funding_cad, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(payload.club_name.trim())
    .bind(payload.group_id.map(|g| g.to_string()))
    .bind(auth.user_id.to_string())
    .bind(payload.requested_funding_cad)
    .bind(RequestStatus::Submitted.as_str())
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&state.pool)
    .await?;

    let form = fetch_form(&state.pool, id).await?;
    log_activity_with_old(&state.event_bus, "created", Some(auth.user_id), &form, None);

    Ok((StatusCode::CREATED, Json(form)))
}

#[utoipa::path(
    get,
    path = "/budgets/{id}",
    tag = "Budgets",
    params(("id" = Uuid, Path, description = "Budget form id")),
    responses(
        (status = 200, description = "Budget form detail", body = BudgetForm),
        (status = 403, description = "Outside the caller's visibility scope")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_budget_form(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BudgetForm>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    let form = fetch_form(&state.pool, id).await?;

    if !principal.read_scope().permits(form.group_id, form.user_id) {
        return Err(AppError::forbidden("budget form is outside your visibility scope"));
    }

    Ok(Json(form))
}

#[utoipa::path(
    put,
    path = "/budgets/{id}/status",
    tag = "Budgets",
    params(("id" = Uuid, Path, description = "Budget form id")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Status updated", body = BudgetForm),
        (status = 403, description = "Caller may not manage this budget form")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdateRequest>,
) -> AppResult<Json<BudgetForm>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    let before = fetch_form(&state.pool, id).await?;

    if !principal.can_manage_request(before.group_id) {
        return Err(AppError::forbidden("you may not manage this budget form"));
    }

    let now = utc_now();
    sqlx::query("UPDATE budget_forms SET status = ?, updated_at = ? WHERE id = ?")
        .bind(payload.status.as_str())
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let after = fetch_form(&state.pool, id).await?;
    log_activity_with_old(&state.event_bus, "status_changed", Some(auth.user_id), &after, Some(&before));

    Ok(Json(after))
}

#[utoipa::path(
    get,
    path = "/budgets/{id}/rows",
    tag = "Budgets",
    params(("id" = Uuid, Path, description = "Budget form id")),
    responses((status = 200, description = "Budget sheet rows", body = [BudgetFormRow])),
    security(("bearerAuth" = []))
)]
pub async fn list_rows(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<BudgetFormRow>>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    let form = fetch_form(&state.pool, id).await?;

    if !principal.read_scope().permits(form.group_id, form.user_id) {
        return Err(AppError::forbidden("budget form is outside your visibility scope"));
    }

    let row_data = sqlx::query(
        "SELECT id, form_id, row_type, label, allocations, created_at FROM budget_form_rows WHERE form_id = ? ORDER BY created_at",
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let rows: Vec<BudgetFormRow> = row_data
        .iter()
        .map(rows::budget_form_row_from_row)
        .collect::<Result<_, _>>()?;

    Ok(Json(rows))
}
