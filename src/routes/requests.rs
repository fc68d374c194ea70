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
use crate::models::request::{PaymentRequest, PaymentRequestCreate, RequestStatus, StatusUpdateRequest};
use crate::notify::{dispatch, Notification};
use crate::utils::{new_request_code, utc_now};

const REQUEST_COLUMNS: &str = "id, request_id, user_id, group_id, full_name, email_address, \
     amount_requested_cad, status, payment_timeframe, budget_line, payment_method, \
     interac_email, interac_phone, mailing_address, submitted_at, created_at, updated_at";

/// Fetch payment requests visible under the caller's read scope. The
/// predicate is applied in SQL so no out-of-scope row ever leaves storage.
pub(crate) async fn fetch_scoped_requests(
    pool: &SqlitePool,
    scope: &ReadScope,
) -> AppResult<Vec<PaymentRequest>> {
    let rows: Vec<SqliteRow> = match scope {
        ReadScope::All => {
            sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM payment_requests ORDER BY submitted_at DESC"
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
                "SELECT {REQUEST_COLUMNS} FROM payment_requests WHERE group_id IN ({placeholders}) ORDER BY submitted_at DESC"
            );
            let mut query = sqlx::query(&sql);
            for group in groups {
                query = query.bind(group.to_string());
            }
            query.fetch_all(pool).await?
        }
        ReadScope::Own(user_id) => {
            sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM payment_requests WHERE user_id = ? ORDER BY submitted_at DESC"
            ))
            .bind(user_id.to_string())
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(rows::payment_request_from_row).collect()
}

async fn fetch_request(pool: &SqlitePool, id: Uuid) -> AppResult<PaymentRequest> {
    let row = sqlx::query(&format!(
        "SELECT {REQUEST_COLUMNS} FROM payment_requests WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("payment request not found"))?;

    rows::payment_request_from_row(&row)
}

#[utoipa::path(
    get,
    path = "/requests",
    tag = "Requests",
    responses((status = 200, description = "Requests visible to the caller", body = [PaymentRequest])),
    security(("bearerAuth" = []))
)]
pub async fn list_requests(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<PaymentRequest>>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    let requests = fetch_scoped_requests(&state.pool, &principal.read_scope()).await?;
    Ok(Json(requests))
}

#[utoipa::path(
    post,
    path = "/requests",
    tag = "Requests",
    request_body = PaymentRequestCreate,
    responses(
        (status = 201, description = "Request submitted", body = PaymentRequest),
        (status = 403, description = "Caller may not submit requests")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<PaymentRequestCreate>,
) -> AppResult<(StatusCode, Json<PaymentRequest>)> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if !principal.can_create_requests() {
        return Err(AppError::forbidden("submitting requests requires the create_requests permission"));
    }

    if payload.full_name.trim().is_empty() {
        return Err(AppError::bad_request("full name is required"));
    }
    if !payload.amount_requested_cad.is_finite() || payload.amount_requested_cad < 0.0 {
        return Err(AppError::bad_request("amount must be a non-negative number"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO payment_requests (id, request_id, user_id, group_id, full_name, email_address, \
         amount_requested_cad, status, payment_timeframe, budget_line, payment_method, \
         interac_email, interac_phone, mailing_address, submitted_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(new_request_code())
    .bind(auth.user_id.to_string())
    .bind(payload.group_id.map(|g| g.to_string()))
    .bind(payload.full_name.trim())
    .bind(&payload.email_address)
    .bind(payload.amount_requested_cad)
    .bind(RequestStatus::Submitted.as_str())
    .bind(&payload.payment_timeframe)
    .bind(&payload.budget_line)
    .bind(&payload.payment_method)
    .bind(&payload.interac_email)
    .bind(&payload.interac_phone)
    .bind(&payload.mailing_address)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&state.pool)
    .await?;

    let request = fetch_request(&state.pool, id).await?;
    log_activity_with_old(&state.event_bus, "created", Some(auth.user_id), &request, None);

    Ok((StatusCode::CREATED, Json(request)))
}

#[utoipa::path(
    get,
    path = "/requests/{id}",
    tag = "Requests",
    params(("id" = Uuid, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request detail", body = PaymentRequest),
        (status = 403, description = "Outside the caller's visibility scope")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentRequest>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    let request = fetch_request(&state.pool, id).await?;

    // existence is not hidden; out-of-scope access is denied, not 404
    if !principal.read_scope().permits(request.group_id, request.user_id) {
        return Err(AppError::forbidden("request is outside your visibility scope"));
    }

    Ok(Json(request))
}

#[utoipa::path(
    put,
    path = "/requests/{id}/status",
    tag = "Requests",
    params(("id" = Uuid, Path, description = "Request id")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Status updated", body = PaymentRequest),
        (status = 403, description = "Caller may not manage this request"),
        (status = 409, description = "Request is locked")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdateRequest>,
) -> AppResult<Json<PaymentRequest>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    let before = fetch_request(&state.pool, id).await?;

    if !principal.can_manage_request(before.group_id) {
        return Err(AppError::forbidden("you may not manage this request"));
    }

    if state.policy.reimbursed_locked && before.status == RequestStatus::Reimbursed {
        return Err(AppError::conflict("reimbursed requests are locked"));
    }

    let now = utc_now();
    sqlx::query("UPDATE payment_requests SET status = ?, updated_at = ? WHERE id = ?")
        .bind(payload.status.as_str())
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let after = fetch_request(&state.pool, id).await?;
    log_activity_with_old(&state.event_bus, "status_changed", Some(auth.user_id), &after, Some(&before));

    // Notify the requester; delivery failure never rolls the status back.
    if let Some(recipient) = after.email_address.clone() {
        let notification = Notification::new(
            recipient,
            format!("Payment request {} is now {}", after.request_id, after.status.as_str()),
            format!(
                "The status of your payment request {} for ${:.2} CAD changed to {}.",
                after.request_id, after.amount_requested_cad, after.status.as_str()
            ),
        );
        dispatch(&state.notifiers, &state.event_bus, "email", notification, Some(auth.user_id));
    }

    Ok(Json(after))
}
