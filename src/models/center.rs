use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::Type, PartialEq)]
#[sqlx(type_name = "plan_type", rename_all = "snake_case")]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Free,
    Standard,
    Premium,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Center {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub logo_url: Option<String>,
    pub plan: PlanType,
    pub subscription_status: SubscriptionStatus,
    pub billing_customer_id: Option<String>,
    pub trial_expires_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub currency: String,
    pub fee_due_day: i16,
    pub sms_sender_id: Option<String>,
    #[serde(skip)]
    pub sms_api_key_enc: Option<Vec<u8>>,
    #[serde(skip)]
    pub sms_api_key_iv: Option<Vec<u8>>,
    #[serde(skip)]
    pub sms_api_key_tag: Option<Vec<u8>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Center {
    pub fn sms_configured(&self) -> bool {
        self.sms_api_key_enc.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCenterRequest {
    pub slug: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub plan: Option<PlanType>,
    pub trial_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCenterRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub plan: Option<PlanType>,
    pub is_active: Option<bool>,
    pub trial_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub currency: Option<String>,
    pub fee_due_day: Option<i16>,
    pub sms_sender_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SmsCredentialsRequest {
    pub api_key: String,
}

/// Center profile as shown to tenant members.
#[derive(Debug, Serialize)]
pub struct CenterSettings {
    pub slug: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub logo_url: Option<String>,
    pub currency: String,
    pub fee_due_day: i16,
    pub sms_sender_id: Option<String>,
    pub sms_configured: bool,
    pub plan: PlanType,
    pub subscription_status: SubscriptionStatus,
    pub trial_expires_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl From<Center> for CenterSettings {
    fn from(c: Center) -> Self {
        let sms_configured = c.sms_configured();
        Self {
            slug: c.slug,
            name: c.name,
            address: c.address,
            phone: c.phone,
            email: c.email,
            logo_url: c.logo_url,
            currency: c.currency,
            fee_due_day: c.fee_due_day,
            sms_sender_id: c.sms_sender_id,
            sms_configured,
            plan: c.plan,
            subscription_status: c.subscription_status,
            trial_expires_at: c.trial_expires_at,
            current_period_end: c.current_period_end,
        }
    }
}
