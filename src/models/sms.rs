use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SmsTemplate {
    pub id: Uuid,
    pub name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Sending,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }
}

/// Which students a campaign targets. All present criteria must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecipientFilter {
    pub grade_level: Option<String>,
    pub class_name: Option<String>,
    /// Only students whose outstanding balance is at least this amount.
    pub min_balance_cents: Option<i64>,
    pub student_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SmsCampaign {
    pub id: Uuid,
    pub name: String,
    pub message: String,
    pub filter: sqlx::types::Json<RecipientFilter>,
    pub status: String,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    /// Either a literal message or a template id must be given.
    pub message: Option<String>,
    pub template_id: Option<Uuid>,
    #[serde(default)]
    pub filter: RecipientFilter,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SmsRecipient {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub student_id: Option<Uuid>,
    pub phone: String,
    pub message: String,
    pub status: String,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub attempts: i32,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RecipientQuery {
    pub status: Option<RecipientStatus>,
}

/// Candidate row used to build a campaign's recipient list.
#[derive(Debug, Clone, FromRow)]
pub struct RecipientCandidate {
    pub student_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub balance_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct TestSmsRequest {
    pub to: String,
    pub message: String,
}

/// Request body accepted by the SMS gateway.
#[derive(Debug, Serialize)]
pub struct GatewayRequest<'a> {
    pub to: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<&'a str>,
}

/// Response body returned by the SMS gateway.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}
