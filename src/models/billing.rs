use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::center::{PlanType, SubscriptionStatus};

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: PlanType,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedirectUrl {
    pub url: String,
}

/// Subscription event pushed by the billing provider.
#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub center_slug: String,
    pub customer_id: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub plan: Option<PlanType>,
    pub current_period_end: Option<DateTime<Utc>>,
}
