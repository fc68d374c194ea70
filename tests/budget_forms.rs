//! Annual budget form lifecycle and scoping.

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use club_treasury::create_app;

async fn setup() -> Result<(SqlitePool, Router, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok((pool, app, dir))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body_json: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body_json {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp: Response = app.clone().oneshot(request).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };

    Ok((status, value))
}

async fn register(app: &Router, name: &str, email: &str) -> Result<(String, Uuid)> {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": name, "email": email, "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");

    let token = body.get("token").and_then(|v| v.as_str()).context("missing token")?.to_string();
    let user_id = body
        .pointer("/user/id")
        .and_then(|v| v.as_str())
        .context("missing user id")?;

    Ok((token, Uuid::parse_str(user_id)?))
}

async fn grant(
    pool: &SqlitePool,
    user_id: Uuid,
    role_name: &str,
    permissions: &[&str],
    group_id: Option<Uuid>,
    is_global: bool,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    let role_id: Option<String> = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
        .bind(role_name)
        .fetch_optional(pool)
        .await?;

    let role_id = match role_id {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query("INSERT INTO roles (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
                .bind(&id)
                .bind(role_name)
                .bind(&now)
                .bind(&now)
                .execute(pool)
                .await?;
            id
        }
    };

    for permission in permissions {
        sqlx::query(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) \
             SELECT ?, id, ? FROM permissions WHERE name = ?",
        )
        .bind(&role_id)
        .bind(&now)
        .bind(permission)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "INSERT OR IGNORE INTO group_roles (role_id, group_id, is_global, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&role_id)
    .bind(group_id.map(|g| g.to_string()))
    .bind(is_global as i64)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO user_roles (id, user_id, role_id, group_id, is_global, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(&role_id)
    .bind(group_id.map(|g| g.to_string()))
    .bind(is_global as i64)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

#[tokio::test]
async fn budget_form_lifecycle() -> Result<()> {
    let (pool, app, _dir) = setup().await?;

    let now = chrono::Utc::now().to_rfc3339();
    let g1 = Uuid::new_v4();
    sqlx::query("INSERT INTO groups (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(g1.to_string())
        .bind("Robotics")
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await?;

    let (member_token, member_id) = register(&app, "Member", "member@example.com").await?;
    grant(&pool, member_id, "member", &["create_requests"], None, true).await?;

    // submit
    let (status, form) = send(
        &app,
        "POST",
        "/budgets",
        Some(&member_token),
        Some(json!({
            "club_name": "Robotics",
            "group_id": g1.to_string(),
            "requested_funding_cad": 4200.0
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "budget create failed: {form}");
    let form_id = form.get("id").and_then(|v| v.as_str()).context("missing id")?.to_string();
    assert_eq!(form.get("status").and_then(|v| v.as_str()), Some("Submitted"));

    // a validation failure never writes
    let (status, _) = send(
        &app,
        "POST",
        "/budgets",
        Some(&member_token),
        Some(json!({"club_name": " ", "requested_funding_cad": 10.0})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // the member cannot approve their own form
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/budgets/{}/status", form_id),
        Some(&member_token),
        Some(json!({"status": "Approved"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // a club manager for g1 can
    let (mgr_token, mgr_id) = register(&app, "Mgr", "mgr@example.com").await?;
    grant(&pool, mgr_id, "g1_manager", &["manage_club_requests", "view_club_requests"], Some(g1), false).await?;

    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/budgets/{}/status", form_id),
        Some(&mgr_token),
        Some(json!({"status": "Approved"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "status update failed: {updated}");
    assert_eq!(updated.get("status").and_then(|v| v.as_str()), Some("Approved"));

    // the manager's list shows the g1 form
    let (status, list) = send(&app, "GET", "/budgets", Some(&mgr_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    Ok(())
}

#[tokio::test]
async fn budget_rows_are_readable_within_scope() -> Result<()> {
    let (pool, app, _dir) = setup().await?;

    let (member_token, member_id) = register(&app, "Member", "member@example.com").await?;
    grant(&pool, member_id, "member", &["create_requests"], None, true).await?;

    let (status, form) = send(
        &app,
        "POST",
        "/budgets",
        Some(&member_token),
        Some(json!({"club_name": "Robotics", "requested_funding_cad": 100.0})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let form_id = form.get("id").and_then(|v| v.as_str()).context("missing id")?.to_string();

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO budget_form_rows (id, form_id, row_type, label, allocations, created_at) \
         VALUES (?, ?, 'data', 'Events', '[100.0]', ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&form_id)
    .bind(&now)
    .execute(&pool)
    .await?;

    // the owner reads the sheet rows
    let (status, rows) = send(&app, "GET", &format!("/budgets/{}/rows", form_id), Some(&member_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().context("expected array")?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("label").and_then(|v| v.as_str()), Some("Events"));
    assert_eq!(
        rows[0].get("allocations").and_then(|v| v.as_array()).map(Vec::len),
        Some(1)
    );

    // a stranger with no roles is denied
    let (stranger_token, _) = register(&app, "Stranger", "stranger@example.com").await?;
    let (status, _) = send(&app, "GET", &format!("/budgets/{}/rows", form_id), Some(&stranger_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}
