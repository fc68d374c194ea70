use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};
use crate::models::request::RequestStatus;

/// Annual budget submission for a club. Shares the request status lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BudgetForm {
    pub id: Uuid,
    pub club_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    pub user_id: Uuid,
    pub requested_funding_cad: f64,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for BudgetForm {
    fn entity_type() -> &'static str { "budget_form" }
    fn subject_id(&self) -> Uuid { self.id }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "status_changed" => Severity::Critical,
            _ => Severity::Important,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BudgetFormCreate {
    #[schema(example = "Robotics Club")]
    pub club_name: String,
    pub group_id: Option<Uuid>,
    #[schema(example = 4200.0)]
    pub requested_funding_cad: f64,
}

/// One line of an annual budget sheet. Read-only through the API; these rows
/// feed the budget-utilization analytics.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BudgetFormRow {
    pub id: Uuid,
    pub form_id: Uuid,
    /// "data" for a budget line, "total" for the sheet's roll-up row.
    pub row_type: String,
    pub label: String,
    /// Per-year allocation figures, oldest first.
    pub allocations: Vec<f64>,
    pub created_at: DateTime<Utc>,
}
