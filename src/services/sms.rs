use std::{collections::HashSet, sync::Arc, time::Duration};

use futures_util::{stream, StreamExt};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    db::tenant::schema_name,
    error::{ServiceError, ServiceResult},
    models::{
        center::Center,
        sms::{
            CampaignStatus, CreateCampaignRequest, GatewayRequest, GatewayResponse,
            RecipientCandidate, RecipientFilter, RecipientStatus, SmsCampaign, SmsRecipient,
            SmsTemplate, TemplateRequest,
        },
    },
    services::{encryption, fees::format_cents, metrics::SMS_COUNTER},
};

const MAX_MESSAGE_LEN: usize = 1600;
const BACKOFF_BASE_MS: u64 = 500;

// ─── Pure helpers ────────────────────────────────────────────────────────────

/// Canonical phone form: optional leading `+` followed by 7–15 digits.
/// Spaces, dashes, dots and parentheses are dropped; a `00` prefix becomes `+`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let (plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => match trimmed.strip_prefix("00") {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        },
    };

    let mut digits = String::with_capacity(rest.len());
    for ch in rest.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }
    if !(7..=15).contains(&digits.len()) {
        return None;
    }
    Some(if plus { format!("+{digits}") } else { digits })
}

/// Replace `{name}` placeholders with their values. Unknown placeholders are left as is.
/// Substituted values are never scanned again.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((v, close)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// A recipient ready to be stored against a campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRecipient {
    pub student_id: Uuid,
    pub phone: String,
    pub message: String,
}

/// One personalised message per distinct valid guardian phone.
/// The first student seen for a phone wins.
pub fn build_recipients(
    candidates: &[RecipientCandidate],
    template: &str,
    center_name: &str,
    currency: &str,
) -> Vec<PlannedRecipient> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for c in candidates {
        let Some(phone) = c.guardian_phone.as_deref().and_then(normalize_phone) else {
            continue;
        };
        if !seen.insert(phone.clone()) {
            continue;
        }
        let balance = format_cents(c.balance_cents, currency);
        let message = render_template(
            template,
            &[
                ("first_name", &c.first_name),
                ("last_name", &c.last_name),
                ("guardian_name", c.guardian_name.as_deref().unwrap_or("Parent/Guardian")),
                ("balance", &balance),
                ("center_name", center_name),
            ],
        );
        out.push(PlannedRecipient { student_id: c.student_id, phone, message });
    }
    out
}

/// Final campaign status once no recipient is pending.
pub fn final_status(sent: i64, failed: i64) -> CampaignStatus {
    if sent == 0 && failed > 0 {
        CampaignStatus::Failed
    } else {
        CampaignStatus::Completed
    }
}

fn check_message(message: &str) -> ServiceResult<()> {
    if message.trim().is_empty() {
        return Err(ServiceError::validation("message is required"));
    }
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ServiceError::validation(format!(
            "message exceeds {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(())
}

// ─── Gateway client ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Network failure, 5xx or 429: worth retrying.
    #[error("{0}")]
    Transient(String),
    /// Gateway rejected the message.
    #[error("{0}")]
    Rejected(String),
}

/// API key and sender id used for one center's traffic.
#[derive(Clone)]
pub struct SmsCredentials {
    pub api_key: String,
    pub sender_id: String,
}

pub struct SmsGateway {
    http: reqwest::Client,
    url: Option<String>,
    default_api_key: Option<String>,
    default_sender: String,
    master_key: Option<[u8; 32]>,
    pub concurrency: usize,
    pub max_retries: u32,
}

impl SmsGateway {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: config.sms_gateway_url.clone(),
            default_api_key: config.sms_gateway_api_key.clone(),
            default_sender: config.sms_sender_id.clone(),
            master_key: config.encryption_master_key,
            concurrency: config.sms_concurrency.max(1),
            max_retries: config.sms_max_retries,
        }
    }

    /// The center's own gateway key when stored, the platform key otherwise.
    pub fn credentials_for(&self, center: &Center) -> ServiceResult<SmsCredentials> {
        if self.url.is_none() {
            return Err(ServiceError::NotConfigured("SMS gateway"));
        }
        let sender_id = center
            .sms_sender_id
            .clone()
            .unwrap_or_else(|| self.default_sender.clone());

        if let (Some(ciphertext), Some(iv), Some(tag)) = (
            &center.sms_api_key_enc,
            &center.sms_api_key_iv,
            &center.sms_api_key_tag,
        ) {
            let master = self
                .master_key
                .ok_or(ServiceError::NotConfigured("encryption master key"))?;
            let sealed = encryption::Sealed {
                ciphertext: ciphertext.clone(),
                iv: iv.clone(),
                tag: tag.clone(),
            };
            let api_key = encryption::open_secret(&master, &center.slug, &sealed)?;
            return Ok(SmsCredentials { api_key, sender_id });
        }

        let api_key = self
            .default_api_key
            .clone()
            .ok_or(ServiceError::NotConfigured("SMS gateway API key"))?;
        Ok(SmsCredentials { api_key, sender_id })
    }

    /// Single gateway call. Returns the provider message id.
    async fn send_once(
        &self,
        creds: &SmsCredentials,
        to: &str,
        message: &str,
    ) -> Result<Option<String>, SendError> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| SendError::Rejected("SMS gateway not configured".into()))?;

        let resp = self
            .http
            .post(url)
            .bearer_auth(&creds.api_key)
            .json(&GatewayRequest { to, message, sender_id: Some(&creds.sender_id) })
            .send()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SendError::Transient(format!("gateway returned {status}")));
        }

        let body: GatewayResponse = resp
            .json()
            .await
            .map_err(|e| SendError::Rejected(format!("unreadable gateway response ({status}): {e}")))?;

        if body.success {
            Ok(body.message_id)
        } else {
            Err(SendError::Rejected(
                body.error.unwrap_or_else(|| format!("gateway returned {status}")),
            ))
        }
    }

    /// Send with exponential backoff on transient failures.
    /// Returns the outcome and the number of attempts made.
    pub async fn deliver(
        &self,
        creds: &SmsCredentials,
        to: &str,
        message: &str,
    ) -> (Result<Option<String>, SendError>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(creds, to, message).await {
                Err(SendError::Transient(e)) if attempt <= self.max_retries => {
                    let delay = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                    warn!("SMS to {to} failed (attempt {attempt}), retrying in {delay}ms: {e}");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                other => return (other, attempt),
            }
        }
    }

    /// One-off message outside any campaign. Returns the gateway message id.
    pub async fn send_test(
        &self,
        creds: &SmsCredentials,
        to: &str,
        message: &str,
    ) -> ServiceResult<Option<String>> {
        check_message(message)?;
        let phone = normalize_phone(to)
            .ok_or_else(|| ServiceError::validation("invalid phone number"))?;
        match self.deliver(creds, &phone, message).await {
            (Ok(id), _) => Ok(id),
            (Err(SendError::Rejected(e)), _) => Err(ServiceError::validation(e)),
            (Err(SendError::Transient(e)), attempts) => Err(ServiceError::Upstream(format!(
                "SMS gateway failed after {attempts} attempts: {e}"
            ))),
        }
    }
}

// ─── Persistence ─────────────────────────────────────────────────────────────

pub struct SmsService;

impl SmsService {
    pub async fn list_templates(pool: &PgPool, tenant: &str) -> ServiceResult<Vec<SmsTemplate>> {
        let schema = schema_name(tenant);
        let rows = sqlx::query_as::<_, SmsTemplate>(&format!(
            "SELECT * FROM {schema}.sms_templates ORDER BY name"
        ))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn create_template(
        pool: &PgPool,
        tenant: &str,
        req: &TemplateRequest,
    ) -> ServiceResult<SmsTemplate> {
        if req.name.trim().is_empty() {
            return Err(ServiceError::validation("name is required"));
        }
        check_message(&req.body)?;
        let schema = schema_name(tenant);
        let row = sqlx::query_as::<_, SmsTemplate>(&format!(
            "INSERT INTO {schema}.sms_templates (name, body) VALUES ($1, $2) RETURNING *"
        ))
        .bind(req.name.trim())
        .bind(&req.body)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn update_template(
        pool: &PgPool,
        tenant: &str,
        id: Uuid,
        req: &TemplateRequest,
    ) -> ServiceResult<SmsTemplate> {
        if req.name.trim().is_empty() {
            return Err(ServiceError::validation("name is required"));
        }
        check_message(&req.body)?;
        let schema = schema_name(tenant);
        sqlx::query_as::<_, SmsTemplate>(&format!(
            "UPDATE {schema}.sms_templates SET name = $1, body = $2 WHERE id = $3 RETURNING *"
        ))
        .bind(req.name.trim())
        .bind(&req.body)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("SMS template"))
    }

    pub async fn delete_template(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let result = sqlx::query(&format!("DELETE FROM {schema}.sms_templates WHERE id = $1"))
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("SMS template"));
        }
        Ok(())
    }

    /// Create a draft campaign and materialise its recipient list.
    pub async fn create_campaign(
        pool: &PgPool,
        tenant: &str,
        created_by: Uuid,
        req: &CreateCampaignRequest,
    ) -> ServiceResult<SmsCampaign> {
        if req.name.trim().is_empty() {
            return Err(ServiceError::validation("name is required"));
        }
        let schema = schema_name(tenant);

        let message = match (&req.message, req.template_id) {
            (Some(m), _) => m.clone(),
            (None, Some(template_id)) => sqlx::query_scalar(&format!(
                "SELECT body FROM {schema}.sms_templates WHERE id = $1"
            ))
            .bind(template_id)
            .fetch_optional(pool)
            .await?
            .ok_or(ServiceError::NotFound("SMS template"))?,
            (None, None) => {
                return Err(ServiceError::validation("message or template_id is required"));
            }
        };
        check_message(&message)?;

        let (center_name, currency): (String, String) =
            sqlx::query_as("SELECT name, currency FROM public.centers WHERE slug = $1")
                .bind(tenant)
                .fetch_optional(pool)
                .await?
                .ok_or(ServiceError::NotFound("center"))?;

        let mut tx = pool.begin().await?;

        let candidates = Self::candidates(&mut tx, &schema, &req.filter).await?;
        let planned = build_recipients(&candidates, &message, &center_name, currency.trim());

        let campaign = sqlx::query_as::<_, SmsCampaign>(&format!(
            "INSERT INTO {schema}.sms_campaigns (name, message, filter, total_recipients, created_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *"
        ))
        .bind(req.name.trim())
        .bind(&message)
        .bind(sqlx::types::Json(&req.filter))
        .bind(planned.len() as i32)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        if !planned.is_empty() {
            let student_ids: Vec<Uuid> = planned.iter().map(|p| p.student_id).collect();
            let phones: Vec<&str> = planned.iter().map(|p| p.phone.as_str()).collect();
            let messages: Vec<&str> = planned.iter().map(|p| p.message.as_str()).collect();
            sqlx::query(&format!(
                "INSERT INTO {schema}.sms_recipients (campaign_id, student_id, phone, message)
                 SELECT $1, * FROM UNNEST($2::uuid[], $3::text[], $4::text[])"
            ))
            .bind(campaign.id)
            .bind(&student_ids)
            .bind(&phones)
            .bind(&messages)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            "SMS: campaign {} created for {tenant} with {} recipient(s)",
            campaign.id,
            planned.len()
        );
        Ok(campaign)
    }

    async fn candidates(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        schema: &str,
        filter: &RecipientFilter,
    ) -> ServiceResult<Vec<RecipientCandidate>> {
        let rows = sqlx::query_as::<_, RecipientCandidate>(&format!(
            "WITH balances AS (
                 SELECT student_id, SUM(amount_cents - paid_cents)::BIGINT AS balance_cents
                 FROM {schema}.fees
                 WHERE status IN ('due', 'partial')
                 GROUP BY student_id
             )
             SELECT st.id AS student_id, st.first_name, st.last_name,
                    st.guardian_name, st.guardian_phone,
                    COALESCE(b.balance_cents, 0)::BIGINT AS balance_cents
             FROM {schema}.students st
             LEFT JOIN balances b ON b.student_id = st.id
             WHERE st.is_active = TRUE
               AND st.guardian_phone IS NOT NULL
               AND ($1::TEXT IS NULL OR st.grade_level = $1)
               AND ($2::TEXT IS NULL OR st.class_name = $2)
               AND ($3::BIGINT IS NULL OR COALESCE(b.balance_cents, 0) >= $3)
               AND ($4::uuid[] IS NULL OR st.id = ANY($4))
             ORDER BY st.last_name, st.first_name"
        ))
        .bind(&filter.grade_level)
        .bind(&filter.class_name)
        .bind(filter.min_balance_cents)
        .bind(&filter.student_ids)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    pub async fn list_campaigns(pool: &PgPool, tenant: &str) -> ServiceResult<Vec<SmsCampaign>> {
        let schema = schema_name(tenant);
        let rows = sqlx::query_as::<_, SmsCampaign>(&format!(
            "SELECT * FROM {schema}.sms_campaigns ORDER BY created_at DESC LIMIT 200"
        ))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_campaign(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<SmsCampaign> {
        let schema = schema_name(tenant);
        sqlx::query_as::<_, SmsCampaign>(&format!(
            "SELECT * FROM {schema}.sms_campaigns WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("campaign"))
    }

    pub async fn list_recipients(
        pool: &PgPool,
        tenant: &str,
        campaign_id: Uuid,
        status: Option<RecipientStatus>,
    ) -> ServiceResult<Vec<SmsRecipient>> {
        let schema = schema_name(tenant);
        let rows = sqlx::query_as::<_, SmsRecipient>(&format!(
            "SELECT * FROM {schema}.sms_recipients
             WHERE campaign_id = $1 AND ($2::TEXT IS NULL OR status = $2)
             ORDER BY phone"
        ))
        .bind(campaign_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete_campaign(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<()> {
        let campaign = Self::get_campaign(pool, tenant, id).await?;
        if campaign.status != CampaignStatus::Draft.as_str() {
            return Err(ServiceError::conflict("only draft campaigns can be deleted"));
        }
        let schema = schema_name(tenant);
        sqlx::query(&format!(
            "DELETE FROM {schema}.sms_campaigns WHERE id = $1 AND status = 'draft'"
        ))
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Move a campaign to `sending`. Fails if a send is already running or
    /// nothing is pending.
    pub async fn begin_send(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<SmsCampaign> {
        let schema = schema_name(tenant);
        let campaign = sqlx::query_as::<_, SmsCampaign>(&format!(
            "UPDATE {schema}.sms_campaigns c
             SET status = 'sending', started_at = COALESCE(started_at, NOW()), completed_at = NULL
             WHERE c.id = $1 AND c.status <> 'sending'
               AND EXISTS (SELECT 1 FROM {schema}.sms_recipients r
                           WHERE r.campaign_id = c.id AND r.status = 'pending')
             RETURNING c.*"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        match campaign {
            Some(c) => Ok(c),
            None => {
                let current = Self::get_campaign(pool, tenant, id).await?;
                Err(if current.status == CampaignStatus::Sending.as_str() {
                    ServiceError::conflict("campaign is already sending")
                } else {
                    ServiceError::conflict("campaign has no pending recipients")
                })
            }
        }
    }

    /// Release campaigns a previous process left in `sending`. Their pending
    /// recipients stay pending, so the next send resumes where it stopped.
    pub async fn release_interrupted(pool: &PgPool, tenant: &str) -> ServiceResult<u64> {
        let schema = schema_name(tenant);
        let released = sqlx::query(&format!(
            "UPDATE {schema}.sms_campaigns SET status = 'failed', completed_at = NOW()
             WHERE status = 'sending'"
        ))
        .execute(pool)
        .await?
        .rows_affected();
        if released > 0 {
            warn!("SMS: released {released} interrupted campaign(s) for {tenant}");
        }
        Ok(released)
    }

    /// Put failed recipients back to pending so the next send retries them.
    pub async fn reset_failed(pool: &PgPool, tenant: &str, id: Uuid) -> ServiceResult<u64> {
        let campaign = Self::get_campaign(pool, tenant, id).await?;
        if campaign.status == CampaignStatus::Sending.as_str() {
            return Err(ServiceError::conflict("campaign is already sending"));
        }
        let schema = schema_name(tenant);
        let mut tx = pool.begin().await?;
        let reset = sqlx::query(&format!(
            "UPDATE {schema}.sms_recipients SET status = 'pending', error = NULL
             WHERE campaign_id = $1 AND status = 'failed'"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query(&format!(
            "UPDATE {schema}.sms_campaigns SET failed_count = 0 WHERE id = $1"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(reset)
    }

    /// Deliver every pending recipient in the background with bounded concurrency.
    /// Only `pending` rows are picked up, so an interrupted send resumes without
    /// messaging anyone twice.
    pub fn dispatch(
        pool: PgPool,
        gateway: Arc<SmsGateway>,
        tenant: String,
        campaign_id: Uuid,
        creds: SmsCredentials,
    ) {
        tokio::spawn(async move {
            if let Err(e) = Self::run_dispatch(&pool, &gateway, &tenant, campaign_id, &creds).await {
                warn!("SMS: campaign {campaign_id} for {tenant} aborted: {e}");
                let schema = schema_name(&tenant);
                let marked = sqlx::query(&format!(
                    "UPDATE {schema}.sms_campaigns SET status = 'failed', completed_at = NOW()
                     WHERE id = $1"
                ))
                .bind(campaign_id)
                .execute(&pool)
                .await;
                if let Err(e) = marked {
                    error!(
                        "SMS: campaign {campaign_id} for {tenant} left in 'sending', \
                         it is released on next startup: {e}"
                    );
                }
            }
        });
    }

    async fn run_dispatch(
        pool: &PgPool,
        gateway: &SmsGateway,
        tenant: &str,
        campaign_id: Uuid,
        creds: &SmsCredentials,
    ) -> ServiceResult<()> {
        let schema = schema_name(tenant);
        let pending = sqlx::query_as::<_, SmsRecipient>(&format!(
            "SELECT * FROM {schema}.sms_recipients WHERE campaign_id = $1 AND status = 'pending'"
        ))
        .bind(campaign_id)
        .fetch_all(pool)
        .await?;
        info!("SMS: campaign {campaign_id} for {tenant}: {} pending", pending.len());

        let outcomes: Vec<ServiceResult<()>> = stream::iter(pending)
            .map(|r| {
                let schema = &schema;
                async move {
                    let (outcome, attempts) = gateway.deliver(creds, &r.phone, &r.message).await;
                    Self::record_outcome(pool, schema, tenant, &r, outcome, attempts).await
                }
            })
            .buffer_unordered(gateway.concurrency)
            .collect()
            .await;

        for e in outcomes.into_iter().filter_map(Result::err) {
            warn!("SMS: failed to record delivery for campaign {campaign_id}: {e}");
        }

        let (sent, failed): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FILTER (WHERE status = 'sent'),
                    COUNT(*) FILTER (WHERE status = 'failed')
             FROM {schema}.sms_recipients WHERE campaign_id = $1"
        ))
        .bind(campaign_id)
        .fetch_one(pool)
        .await?;

        let status = final_status(sent, failed);
        sqlx::query(&format!(
            "UPDATE {schema}.sms_campaigns
             SET status = $1, sent_count = $2, failed_count = $3, completed_at = NOW()
             WHERE id = $4"
        ))
        .bind(status.as_str())
        .bind(sent as i32)
        .bind(failed as i32)
        .bind(campaign_id)
        .execute(pool)
        .await?;

        info!(
            "SMS: campaign {campaign_id} for {tenant} {} (sent={sent}, failed={failed})",
            status.as_str()
        );
        Ok(())
    }

    async fn record_outcome(
        pool: &PgPool,
        schema: &str,
        tenant: &str,
        recipient: &SmsRecipient,
        outcome: Result<Option<String>, SendError>,
        attempts: u32,
    ) -> ServiceResult<()> {
        let (status, message_id, error, counter) = match outcome {
            Ok(id) => (RecipientStatus::Sent, id, None, "sent_count"),
            Err(e) => (RecipientStatus::Failed, None, Some(e.to_string()), "failed_count"),
        };
        SMS_COUNTER
            .with_label_values(&[tenant, status.as_str()])
            .inc();

        let mut tx = pool.begin().await?;
        sqlx::query(&format!(
            "UPDATE {schema}.sms_recipients
             SET status = $1, provider_message_id = $2, error = $3,
                 attempts = attempts + $4,
                 sent_at = CASE WHEN $1 = 'sent' THEN NOW() ELSE sent_at END
             WHERE id = $5"
        ))
        .bind(status.as_str())
        .bind(message_id)
        .bind(error)
        .bind(attempts as i32)
        .bind(recipient.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "UPDATE {schema}.sms_campaigns SET {counter} = {counter} + 1 WHERE id = $1"
        ))
        .bind(recipient.campaign_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(first: &str, phone: Option<&str>, balance: i64) -> RecipientCandidate {
        RecipientCandidate {
            student_id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: "Okafor".to_string(),
            guardian_name: Some("Ngozi".to_string()),
            guardian_phone: phone.map(str::to_string),
            balance_cents: balance,
        }
    }

    #[test]
    fn phones_are_normalised() {
        assert_eq!(normalize_phone("+1 (555) 010-2000").as_deref(), Some("+15550102000"));
        assert_eq!(normalize_phone("0044 20 7946 0000").as_deref(), Some("+442079460000"));
        assert_eq!(normalize_phone(" 0712.345.678 ").as_deref(), Some("0712345678"));
    }

    #[test]
    fn invalid_phones_are_dropped() {
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("0712 ABC 678"), None);
        assert_eq!(normalize_phone("+1234567890123456"), None);
    }

    #[test]
    fn placeholders_are_substituted() {
        let out = render_template(
            "Hi {guardian_name}, {first_name} owes {balance}. {unknown}",
            &[("guardian_name", "Ngozi"), ("first_name", "Ada"), ("balance", "USD 10.00")],
        );
        assert_eq!(out, "Hi Ngozi, Ada owes USD 10.00. {unknown}");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let vars = [("first_name", "{balance}"), ("balance", "USD 25.00")];
        assert_eq!(render_template("Hi {first_name}", &vars), "Hi {balance}");
        assert_eq!(
            render_template("{first_name} owes {balance}", &vars),
            "{balance} owes USD 25.00"
        );
        assert_eq!(render_template("{{first_name}} {", &vars), "{{balance}} {");
    }

    #[test]
    fn recipients_skip_missing_and_duplicate_phones() {
        let candidates = vec![
            candidate("Ada", Some("+1 555 010 2000"), 2500),
            candidate("Obi", Some("+15550102000"), 0),
            candidate("Chi", None, 0),
            candidate("Eze", Some("n/a"), 0),
            candidate("Ife", Some("0712345678"), 0),
        ];
        let planned = build_recipients(&candidates, "{first_name}: {balance} at {center_name}", "Bright Minds", "USD");
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].phone, "+15550102000");
        assert_eq!(planned[0].message, "Ada: USD 25.00 at Bright Minds");
        assert_eq!(planned[1].phone, "0712345678");
        assert_eq!(planned[1].student_id, candidates[4].student_id);
    }

    #[test]
    fn campaign_fails_only_when_nothing_was_sent() {
        assert_eq!(final_status(0, 3), CampaignStatus::Failed);
        assert_eq!(final_status(1, 2), CampaignStatus::Completed);
        assert_eq!(final_status(0, 0), CampaignStatus::Completed);
    }

    #[test]
    fn overlong_messages_are_rejected() {
        assert!(check_message("hello").is_ok());
        assert!(check_message("   ").is_err());
        assert!(check_message(&"x".repeat(MAX_MESSAGE_LEN + 1)).is_err());
    }

    mod gateway {
        use std::sync::atomic::{AtomicUsize, Ordering};

        use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
        use serde_json::{json, Value};

        use super::*;

        /// Local gateway that answers each call with the next scripted reply.
        async fn scripted_gateway(replies: Vec<(StatusCode, Value)>) -> (String, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let replies = Arc::new(replies);
            let app = Router::new()
                .route(
                    "/send",
                    post(
                        |State((calls, replies)): State<(Arc<AtomicUsize>, Arc<Vec<(StatusCode, Value)>>)>| async move {
                            let n = calls.fetch_add(1, Ordering::SeqCst);
                            let (status, body) = replies[n.min(replies.len() - 1)].clone();
                            (status, Json(body))
                        },
                    ),
                )
                .with_state((calls.clone(), replies));
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{addr}/send"), calls)
        }

        fn client(url: String, max_retries: u32) -> SmsGateway {
            SmsGateway {
                http: reqwest::Client::new(),
                url: Some(url),
                default_api_key: Some("platform-key".into()),
                default_sender: "TUTOR".into(),
                master_key: None,
                concurrency: 1,
                max_retries,
            }
        }

        fn creds() -> SmsCredentials {
            SmsCredentials { api_key: "platform-key".into(), sender_id: "TUTOR".into() }
        }

        #[tokio::test]
        async fn transient_failure_is_retried_until_delivered() {
            let (url, calls) = scripted_gateway(vec![
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "success": false })),
                (StatusCode::OK, json!({ "success": true, "messageId": "m-1" })),
            ])
            .await;

            let (outcome, attempts) = client(url, 2).deliver(&creds(), "+254712345678", "hi").await;
            assert_eq!(outcome.unwrap().as_deref(), Some("m-1"));
            assert_eq!(attempts, 2);
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn rejection_is_not_retried() {
            let (url, calls) = scripted_gateway(vec![(
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "error": "invalid destination" }),
            )])
            .await;

            let (outcome, attempts) = client(url, 3).deliver(&creds(), "+254712345678", "hi").await;
            match outcome {
                Err(SendError::Rejected(e)) => assert_eq!(e, "invalid destination"),
                other => panic!("expected rejection, got {other:?}"),
            }
            assert_eq!(attempts, 1);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn retries_stop_at_the_configured_limit() {
            let (url, calls) = scripted_gateway(vec![(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "success": false }),
            )])
            .await;

            let (outcome, attempts) = client(url, 1).deliver(&creds(), "+254712345678", "hi").await;
            assert!(matches!(outcome, Err(SendError::Transient(_))));
            assert_eq!(attempts, 2);
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn test_send_maps_rejection_to_validation() {
            let (url, _) = scripted_gateway(vec![(
                StatusCode::OK,
                json!({ "success": false, "error": "blocked number" }),
            )])
            .await;

            let err = client(url, 0)
                .send_test(&creds(), "0712 345 678", "hello")
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::Validation(ref e) if e == "blocked number"));
        }
    }
}
