//! Tolerant row decoding for TEXT-stored UUIDs and timestamps.
//!
//! SQLite has no native UUID or timestamp types; every id is stored as
//! canonical hyphenated TEXT and every timestamp as RFC3339 TEXT. These
//! helpers decode rows into model structs and normalize the few formats
//! SQLite tooling tends to write.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::budget::{BudgetForm, BudgetFormRow};
use crate::models::group::Group;
use crate::models::rbac::{GroupRole, Permission, Role, UserRole};
use crate::models::request::{PaymentRequest, RequestStatus};
use crate::models::user::DbUser;

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (optional fraction)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

pub fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s.trim()).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, AppError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_uuid(&s)?)),
        _ => Ok(None),
    }
}

fn get_text(row: &SqliteRow, column: &str) -> Result<String, AppError> {
    row.try_get::<String, _>(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

fn get_opt_text(row: &SqliteRow, column: &str) -> Result<Option<String>, AppError> {
    row.try_get::<Option<String>, _>(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

fn parse_status(s: &str) -> Result<RequestStatus, AppError> {
    RequestStatus::parse(s).ok_or_else(|| AppError::internal(format!("invalid status: {}", s)))
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AppError> {
    Ok(DbUser {
        id: parse_uuid(&get_text(row, "id")?)?,
        name: get_text(row, "name")?,
        email: get_text(row, "email")?,
        password_hash: get_text(row, "password_hash")?,
        created_at: parse_datetime(&get_text(row, "created_at")?)?,
        updated_at: parse_datetime(&get_text(row, "updated_at")?)?,
        deleted_at: parse_opt_datetime(get_opt_text(row, "deleted_at")?)?,
    })
}

pub fn group_from_row(row: &SqliteRow) -> Result<Group, AppError> {
    Ok(Group {
        id: parse_uuid(&get_text(row, "id")?)?,
        name: get_text(row, "name")?,
        created_at: parse_datetime(&get_text(row, "created_at")?)?,
        updated_at: parse_datetime(&get_text(row, "updated_at")?)?,
    })
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    Ok(Role {
        id: parse_uuid(&get_text(row, "id")?)?,
        name: get_text(row, "name")?,
        description: get_opt_text(row, "description")?,
        created_at: parse_datetime(&get_text(row, "created_at")?)?,
        updated_at: parse_datetime(&get_text(row, "updated_at")?)?,
    })
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    Ok(Permission {
        id: parse_uuid(&get_text(row, "id")?)?,
        name: get_text(row, "name")?,
        tier: get_text(row, "tier")?,
        description: get_opt_text(row, "description")?,
        created_at: parse_datetime(&get_text(row, "created_at")?)?,
    })
}

pub fn user_role_from_row(row: &SqliteRow) -> Result<UserRole, AppError> {
    let is_global: i64 = row
        .try_get("is_global")
        .map_err(|e| AppError::internal(format!("missing is_global: {}", e)))?;

    Ok(UserRole {
        id: parse_uuid(&get_text(row, "id")?)?,
        user_id: parse_uuid(&get_text(row, "user_id")?)?,
        role_id: parse_uuid(&get_text(row, "role_id")?)?,
        group_id: parse_opt_uuid(get_opt_text(row, "group_id")?)?,
        is_global: is_global != 0,
        created_at: parse_datetime(&get_text(row, "created_at")?)?,
    })
}

pub fn group_role_from_row(row: &SqliteRow) -> Result<GroupRole, AppError> {
    let is_global: i64 = row
        .try_get("is_global")
        .map_err(|e| AppError::internal(format!("missing is_global: {}", e)))?;

    Ok(GroupRole {
        role_id: parse_uuid(&get_text(row, "role_id")?)?,
        group_id: parse_opt_uuid(get_opt_text(row, "group_id")?)?,
        is_global: is_global != 0,
        created_at: parse_datetime(&get_text(row, "created_at")?)?,
    })
}

pub fn payment_request_from_row(row: &SqliteRow) -> Result<PaymentRequest, AppError> {
    let amount: f64 = row
        .try_get("amount_requested_cad")
        .map_err(|e| AppError::internal(format!("missing amount_requested_cad: {}", e)))?;

    Ok(PaymentRequest {
        id: parse_uuid(&get_text(row, "id")?)?,
        request_id: get_text(row, "request_id")?,
        user_id: parse_uuid(&get_text(row, "user_id")?)?,
        group_id: parse_opt_uuid(get_opt_text(row, "group_id")?)?,
        full_name: get_text(row, "full_name")?,
        email_address: get_opt_text(row, "email_address")?,
        amount_requested_cad: amount,
        status: parse_status(&get_text(row, "status")?)?,
        payment_timeframe: get_opt_text(row, "payment_timeframe")?,
        budget_line: get_opt_text(row, "budget_line")?,
        payment_method: get_opt_text(row, "payment_method")?,
        interac_email: get_opt_text(row, "interac_email")?,
        interac_phone: get_opt_text(row, "interac_phone")?,
        mailing_address: get_opt_text(row, "mailing_address")?,
        submitted_at: parse_datetime(&get_text(row, "submitted_at")?)?,
        created_at: parse_datetime(&get_text(row, "created_at")?)?,
        updated_at: parse_datetime(&get_text(row, "updated_at")?)?,
    })
}

pub fn budget_form_from_row(row: &SqliteRow) -> Result<BudgetForm, AppError> {
    let amount: f64 = row
        .try_get("requested_funding_cad")
        .map_err(|e| AppError::internal(format!("missing requested_funding_cad: {}", e)))?;

    Ok(BudgetForm {
        id: parse_uuid(&get_text(row, "id")?)?,
        club_name: get_text(row, "club_name")?,
        group_id: parse_opt_uuid(get_opt_text(row, "group_id")?)?,
        user_id: parse_uuid(&get_text(row, "user_id")?)?,
        requested_funding_cad: amount,
        status: parse_status(&get_text(row, "status")?)?,
        created_at: parse_datetime(&get_text(row, "created_at")?)?,
        updated_at: parse_datetime(&get_text(row, "updated_at")?)?,
    })
}

pub fn budget_form_row_from_row(row: &SqliteRow) -> Result<BudgetFormRow, AppError> {
    let allocations_json = get_text(row, "allocations")?;
    let allocations: Vec<f64> = serde_json::from_str(&allocations_json)
        .map_err(|e| AppError::internal(format!("invalid allocations json: {}", e)))?;

    Ok(BudgetFormRow {
        id: parse_uuid(&get_text(row, "id")?)?,
        form_id: parse_uuid(&get_text(row, "form_id")?)?,
        row_type: get_text(row, "row_type")?,
        label: get_text(row, "label")?,
        allocations,
        created_at: parse_datetime(&get_text(row, "created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_sqlite_formats() {
        assert!(parse_datetime("2023-01-15T10:00:00Z").is_ok());
        assert!(parse_datetime("2023-01-15 10:00:00").is_ok());
        assert!(parse_datetime("2023-01-15 10:00:00.123").is_ok());
        assert!(parse_datetime("2023-01-15").is_ok());
        assert!(parse_datetime("not a date").is_err());
    }

    #[test]
    fn date_only_is_midnight_utc() {
        let dt = parse_datetime("2023-01-15").unwrap();
        assert_eq!(dt.to_rfc3339(), "2023-01-15T00:00:00+00:00");
    }
}
