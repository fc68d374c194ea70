use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::analytics::{build_dashboard, BudgetFigure, Dashboard, RequestFacts};
use crate::app::AppState;
use crate::authz::{self, ReadScope};
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::routes::requests::fetch_scoped_requests;

/// Resolve group ids to display names for the group-distribution chart.
async fn fetch_group_names(pool: &SqlitePool) -> AppResult<HashMap<Uuid, String>> {
    let group_rows = sqlx::query("SELECT id, name FROM groups").fetch_all(pool).await?;

    let mut names = HashMap::new();
    for row in &group_rows {
        let id: String = row.get("id");
        names.insert(crate::db::rows::parse_uuid(&id)?, row.get("name"));
    }
    Ok(names)
}

/// Allocated figures come from the data rows of budget sheets inside the
/// caller's scope; the most recent year's allocation counts, summed across
/// sheets sharing a label.
async fn fetch_budget_figures(pool: &SqlitePool, scope: &ReadScope) -> AppResult<Vec<BudgetFigure>> {
    let base = "SELECT bfr.label, bfr.allocations FROM budget_form_rows bfr \
                INNER JOIN budget_forms bf ON bf.id = bfr.form_id \
                WHERE bfr.row_type = 'data'";

    let figure_rows: Vec<SqliteRow> = match scope {
        ReadScope::All => sqlx::query(base).fetch_all(pool).await?,
        ReadScope::Groups(groups) => {
            if groups.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; groups.len()].join(", ");
            let sql = format!("{base} AND bf.group_id IN ({placeholders})");
            let mut query = sqlx::query(&sql);
            for group in groups {
                query = query.bind(group.to_string());
            }
            query.fetch_all(pool).await?
        }
        ReadScope::Own(user_id) => {
            let sql = format!("{base} AND bf.user_id = ?");
            sqlx::query(&sql)
                .bind(user_id.to_string())
                .fetch_all(pool)
                .await?
        }
    };

    let mut by_label: HashMap<String, f64> = HashMap::new();
    for row in &figure_rows {
        let label: String = row.get("label");
        let allocations_json: String = row.get("allocations");
        let allocations: Vec<f64> = serde_json::from_str(&allocations_json).unwrap_or_default();
        if let Some(latest) = allocations.last() {
            *by_label.entry(label).or_insert(0.0) += latest;
        }
    }

    let mut figures: Vec<BudgetFigure> = by_label
        .into_iter()
        .map(|(label, allocated)| BudgetFigure { label, allocated })
        .collect();
    figures.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(figures)
}

#[utoipa::path(
    get,
    path = "/analytics/dashboard",
    tag = "Analytics",
    responses((status = 200, description = "Spending summaries over the caller's visible requests", body = Dashboard)),
    security(("bearerAuth" = []))
)]
pub async fn dashboard(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Dashboard>> {
    let principal = authz::resolve(&state.pool, auth.user_id).await?;
    let scope = principal.read_scope();

    let requests = fetch_scoped_requests(&state.pool, &scope).await?;
    let group_names = fetch_group_names(&state.pool).await?;
    let figures = fetch_budget_figures(&state.pool, &scope).await?;

    let facts: Vec<RequestFacts> = requests
        .iter()
        .map(|r| RequestFacts {
            timestamp: r.submitted_at,
            amount: Some(r.amount_requested_cad),
            status: Some(r.status.as_str().to_string()),
            group_name: r.group_id.and_then(|g| group_names.get(&g).cloned()),
            payment_timeframe: r.payment_timeframe.clone(),
            budget_line: r.budget_line.clone(),
            email_address: r.email_address.clone(),
        })
        .collect();

    Ok(Json(build_dashboard(&facts, &figures)))
}
