//! Visibility and mutation scoping across permission tiers.

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

async fn create_group(pool: &SqlitePool, name: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query("INSERT INTO groups (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;
    Ok(id)
}

async fn submit_request(
    app: &Router,
    token: &str,
    full_name: &str,
    amount: f64,
    group_id: Option<Uuid>,
) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/requests",
        Some(token),
        Some(json!({
            "full_name": full_name,
            "amount_requested_cad": amount,
            "group_id": group_id.map(|g| g.to_string()),
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "submit failed: {body}");
    Ok(body.get("id").and_then(|v| v.as_str()).context("missing id")?.to_string())
}

#[tokio::test]
async fn club_viewer_sees_only_their_groups_rows() -> Result<()> {
    let (pool, app, _dir) = setup().await?;

    let g1 = create_group(&pool, "Robotics").await?;
    let g2 = create_group(&pool, "Chess").await?;

    let (m1_token, m1_id) = register(&app, "M1", "m1@example.com").await?;
    grant(&pool, m1_id, "member", &["create_requests"], None, true).await?;
    let (m2_token, m2_id) = register(&app, "M2", "m2@example.com").await?;
    grant(&pool, m2_id, "member", &["create_requests"], None, true).await?;

    let r1 = submit_request(&app, &m1_token, "M1", 100.0, Some(g1)).await?;
    let r2 = submit_request(&app, &m2_token, "M2", 50.0, Some(g2)).await?;

    let (club_token, club_id) = register(&app, "Club", "club@example.com").await?;
    grant(&pool, club_id, "g1_viewer", &["view_club_requests"], Some(g1), false).await?;

    // only G1 rows are listed
    let (status, list) = send(&app, "GET", "/requests", Some(&club_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().context("expected array")?;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].get("id").and_then(|v| v.as_str()), Some(r1.as_str()));

    // detail of a G2 row is denied, not hidden
    let (status, _) = send(&app, "GET", &format!("/requests/{}", r2), Some(&club_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn all_tier_scope_is_a_superset_of_club_scope() -> Result<()> {
    let (pool, app, _dir) = setup().await?;

    let g1 = create_group(&pool, "Robotics").await?;
    let g2 = create_group(&pool, "Chess").await?;

    let (m_token, m_id) = register(&app, "M", "m@example.com").await?;
    grant(&pool, m_id, "member", &["create_requests"], None, true).await?;
    submit_request(&app, &m_token, "M", 100.0, Some(g1)).await?;
    submit_request(&app, &m_token, "M", 50.0, Some(g2)).await?;
    submit_request(&app, &m_token, "M", 25.0, None).await?;

    let (club_token, club_id) = register(&app, "Club", "club@example.com").await?;
    grant(&pool, club_id, "g1_viewer", &["view_club_requests"], Some(g1), false).await?;

    let (org_token, org_id) = register(&app, "Org", "org@example.com").await?;
    grant(&pool, org_id, "org_viewer", &["view_all_requests"], None, true).await?;

    let (_, club_list) = send(&app, "GET", "/requests", Some(&club_token), None).await?;
    let (_, org_list) = send(&app, "GET", "/requests", Some(&org_token), None).await?;
    let (_, own_list) = send(&app, "GET", "/requests", Some(&m_token), None).await?;

    let ids = |v: &Value| -> Vec<String> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.get("id").and_then(|i| i.as_str()).unwrap().to_string())
            .collect()
    };

    let club_ids = ids(&club_list);
    let org_ids = ids(&org_list);
    let own_ids = ids(&own_list);

    assert_eq!(club_ids.len(), 1);
    assert_eq!(org_ids.len(), 3);
    assert_eq!(own_ids.len(), 3);

    // every club-visible row is org-visible
    for id in &club_ids {
        assert!(org_ids.contains(id));
    }

    Ok(())
}

#[tokio::test]
async fn club_manager_mutates_only_their_groups_rows() -> Result<()> {
    let (pool, app, _dir) = setup().await?;

    let g1 = create_group(&pool, "Robotics").await?;
    let g2 = create_group(&pool, "Chess").await?;

    let (m_token, m_id) = register(&app, "M", "m@example.com").await?;
    grant(&pool, m_id, "member", &["create_requests"], None, true).await?;
    let r1 = submit_request(&app, &m_token, "M", 100.0, Some(g1)).await?;
    let r2 = submit_request(&app, &m_token, "M", 50.0, Some(g2)).await?;

    // a viewer-only club admin cannot mutate
    let (viewer_token, viewer_id) = register(&app, "Viewer", "viewer@example.com").await?;
    grant(&pool, viewer_id, "g1_viewer", &["view_club_requests"], Some(g1), false).await?;
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/requests/{}/status", r1),
        Some(&viewer_token),
        Some(json!({"status": "Approved"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // a club manager mutates rows in their group only
    let (mgr_token, mgr_id) = register(&app, "Mgr", "mgr@example.com").await?;
    grant(&pool, mgr_id, "g1_manager", &["manage_club_requests"], Some(g1), false).await?;

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/requests/{}/status", r1),
        Some(&mgr_token),
        Some(json!({"status": "In Progress"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "expected ok: {body}");
    assert_eq!(body.get("status").and_then(|v| v.as_str()), Some("In Progress"));

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/requests/{}/status", r2),
        Some(&mgr_token),
        Some(json!({"status": "In Progress"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn club_permission_without_groups_sees_nothing() -> Result<()> {
    let (pool, app, _dir) = setup().await?;

    let g1 = create_group(&pool, "Robotics").await?;

    let (m_token, m_id) = register(&app, "M", "m@example.com").await?;
    grant(&pool, m_id, "member", &["create_requests"], None, true).await?;
    submit_request(&app, &m_token, "M", 100.0, Some(g1)).await?;

    // club-tier permission held globally, but no administered groups:
    // the club predicate matches nothing
    let (lost_token, lost_id) = register(&app, "Lost", "lost@example.com").await?;
    grant(&pool, lost_id, "floating_viewer", &["view_club_requests"], None, true).await?;

    let (status, list) = send(&app, "GET", "/requests", Some(&lost_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().map(Vec::len), Some(0));

    Ok(())
}
