use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Template {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub step_number: i32,
    pub subject: String,
    pub body_html: String,
    pub delay_minutes: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub step_number: i32,
    pub subject: String,
    pub body_html: String,
    pub delay_minutes: Option<i32>,
}
