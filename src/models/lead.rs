use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lead {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub company: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn lead_status(&self) -> LeadStatus {
        LeadStatus::from_str(&self.status).unwrap_or(LeadStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.lead_status(), LeadStatus::Replied | LeadStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LeadStatus {
    Pending,
    Contacted,
    Replied,
    Failed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Pending => "pending",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Replied => "replied",
            LeadStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LeadStatus::Pending),
            "contacted" => Some(LeadStatus::Contacted),
            "replied" => Some(LeadStatus::Replied),
            "failed" => Some(LeadStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLeadRequest {
    pub email: String,
    pub first_name: Option<String>,
    pub company: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmailHistoryEntry {
    pub step_number: i32,
    pub status: String,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
}
