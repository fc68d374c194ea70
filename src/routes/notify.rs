use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::{self, permissions as perms};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::notify::{dispatch, Notification};

#[derive(Debug, Deserialize, ToSchema)]
pub struct NotifySendRequest {
    #[schema(example = "ada@example.com")]
    pub recipient: String,
    #[schema(example = "Your reimbursement was approved")]
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotifyResponse {
    pub message: String,
}

async fn send(
    state: AppState,
    auth: AuthUser,
    channel: &'static str,
    payload: NotifySendRequest,
) -> AppResult<(StatusCode, Json<NotifyResponse>)> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    if !principal.has_permission(perms::MANAGE_ALL_REQUESTS)
        && !principal.has_permission(perms::MANAGE_CLUB_REQUESTS)
    {
        return Err(AppError::forbidden("sending notifications requires a request-management permission"));
    }

    if payload.recipient.trim().is_empty() {
        return Err(AppError::bad_request("recipient is required"));
    }

    let notification = Notification::new(
        payload.recipient.trim(),
        payload.subject.unwrap_or_else(|| "Club treasury update".to_string()),
        payload.body,
    );
    dispatch(&state.notifiers, &state.event_bus, channel, notification, Some(auth.user_id));

    // fire-and-forget: queued is all we promise
    Ok((StatusCode::ACCEPTED, Json(NotifyResponse { message: "notification queued".to_string() })))
}

#[utoipa::path(
    post,
    path = "/notify/email",
    tag = "Notifications",
    request_body = NotifySendRequest,
    responses(
        (status = 202, description = "Email queued", body = NotifyResponse),
        (status = 403, description = "Caller may not send notifications")
    ),
    security(("bearerAuth" = []))
)]
pub async fn send_email(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<NotifySendRequest>,
) -> AppResult<(StatusCode, Json<NotifyResponse>)> {
    send(state, auth, "email", payload).await
}

#[utoipa::path(
    post,
    path = "/notify/sms",
    tag = "Notifications",
    request_body = NotifySendRequest,
    responses(
        (status = 202, description = "SMS queued", body = NotifyResponse),
        (status = 403, description = "Caller may not send notifications")
    ),
    security(("bearerAuth" = []))
)]
pub async fn send_sms(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<NotifySendRequest>,
) -> AppResult<(StatusCode, Json<NotifyResponse>)> {
    send(state, auth, "sms", payload).await
}
