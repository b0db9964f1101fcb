use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub media_dir: String,
    pub host: String,
    pub port: u16,
    pub super_admin_key: String,
    pub app_base_url: String,
    /// 32-byte key (64 hex chars) used to derive per-center encryption keys.
    pub encryption_master_key: Option<[u8; 32]>,
    // SMS gateway
    pub sms_gateway_url: Option<String>,
    pub sms_gateway_api_key: Option<String>,
    pub sms_sender_id: String,
    pub sms_concurrency: usize,
    pub sms_max_retries: u32,
    pub sms_rate_limit_per_hour: u64,
    // Billing portal (optional)
    pub billing_api_url: Option<String>,
    pub billing_api_key: Option<String>,
    pub billing_webhook_secret: Option<String>,
    /// Days a `past_due` center keeps access after its period ended.
    pub past_due_grace_days: i64,
    // Library
    pub library_fine_per_day_cents: i64,
    pub library_loan_days: i64,
    // SMTP (optional)
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            jwt_secret: required("JWT_SECRET")?,
            media_dir: env::var("MEDIA_DIR").unwrap_or_else(|_| "/data/media".into()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            super_admin_key: env::var("SUPER_ADMIN_KEY")
                .unwrap_or_else(|_| "change_this_super_admin_key".into()),
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost".into()),
            encryption_master_key: optional("ENCRYPTION_MASTER_KEY")
                .map(|hex_key| parse_master_key(&hex_key))
                .transpose()?,
            sms_gateway_url: optional("SMS_GATEWAY_URL"),
            sms_gateway_api_key: optional("SMS_GATEWAY_API_KEY"),
            sms_sender_id: env::var("SMS_SENDER_ID").unwrap_or_else(|_| "TUTOR".into()),
            sms_concurrency: parse_or("SMS_CONCURRENCY", 4)?,
            sms_max_retries: parse_or("SMS_MAX_RETRIES", 2)?,
            sms_rate_limit_per_hour: parse_or("SMS_RATE_LIMIT_PER_HOUR", 20)?,
            billing_api_url: optional("BILLING_API_URL"),
            billing_api_key: optional("BILLING_API_KEY"),
            billing_webhook_secret: optional("BILLING_WEBHOOK_SECRET"),
            past_due_grace_days: parse_or("PAST_DUE_GRACE_DAYS", 7)?,
            library_fine_per_day_cents: parse_or("LIBRARY_FINE_PER_DAY_CENTS", 10)?,
            library_loan_days: parse_or("LIBRARY_LOAN_DAYS", 14)?,
            smtp_host: optional("SMTP_HOST"),
            smtp_port: env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()),
            smtp_username: optional("SMTP_USERNAME"),
            smtp_password: optional("SMTP_PASSWORD"),
            smtp_from: optional("SMTP_FROM"),
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {key}: {e}")),
        None => Ok(default),
    }
}

pub fn parse_master_key(hex_key: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| anyhow::anyhow!("ENCRYPTION_MASTER_KEY is not valid hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("ENCRYPTION_MASTER_KEY must be 32 bytes (64 hex chars)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_key_accepts_64_hex_chars() {
        let key = parse_master_key(&"ab".repeat(32)).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn master_key_rejects_wrong_length_or_garbage() {
        assert!(parse_master_key("abcd").is_err());
        assert!(parse_master_key(&"zz".repeat(32)).is_err());
    }
}
