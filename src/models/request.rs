use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};

/// Lifecycle of a reimbursement request. Stored as the display string so the
/// column reads naturally in exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum RequestStatus {
    Submitted,
    #[serde(rename = "In Progress")]
    InProgress,
    Approved,
    Rejected,
    Reimbursed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Submitted => "Submitted",
            RequestStatus::InProgress => "In Progress",
            RequestStatus::Approved => "Approved",
            RequestStatus::Rejected => "Rejected",
            RequestStatus::Reimbursed => "Reimbursed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Submitted" => Some(RequestStatus::Submitted),
            "In Progress" => Some(RequestStatus::InProgress),
            "Approved" => Some(RequestStatus::Approved),
            "Rejected" => Some(RequestStatus::Rejected),
            "Reimbursed" => Some(RequestStatus::Reimbursed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentRequest {
    pub id: Uuid,
    /// Human-facing code shown on receipts, e.g. "PR-9F3A2C".
    pub request_id: String,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    pub amount_requested_cad: f64,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interac_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interac_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailing_address: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for PaymentRequest {
    fn entity_type() -> &'static str { "payment_request" }
    fn subject_id(&self) -> Uuid { self.id }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "status_changed" => Severity::Critical,
            _ => Severity::Important,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentRequestCreate {
    #[schema(example = "Ada Lovelace")]
    pub full_name: String,
    pub email_address: Option<String>,
    #[schema(example = 125.50)]
    pub amount_requested_cad: f64,
    pub group_id: Option<Uuid>,
    #[schema(example = "Within 1 month")]
    pub payment_timeframe: Option<String>,
    #[schema(example = "Events")]
    pub budget_line: Option<String>,
    #[schema(example = "interac")]
    pub payment_method: Option<String>,
    pub interac_email: Option<String>,
    pub interac_phone: Option<String>,
    pub mailing_address: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusUpdateRequest {
    pub status: RequestStatus,
}
