use std::env;

/// Exhaustive environment surface. Only `DATABASE_URL` and `SECRET_KEY` are
/// required; everything else degrades with a logged warning rather than a
/// startup panic.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub secret_key: String,

    pub email_provider: Option<String>,
    pub email_api_key: Option<String>,
    pub email_from_address: Option<String>,
    pub email_from_name: Option<String>,
    pub email_reply_to: Option<String>,

    pub webhook_username: Option<String>,
    pub webhook_password: Option<String>,

    pub worker_poll_interval_seconds: u64,
    pub worker_batch_size: i64,
    pub max_retry_attempts: i32,

    pub reply_mode: ReplyMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyMode {
    Webhook,
    Simulated,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url =
            env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let secret_key = env::var("SECRET_KEY").expect("SECRET_KEY must be set");

        let email_provider = env::var("EMAIL_PROVIDER").ok();
        let email_api_key = Self::provider_api_key(email_provider.as_deref());
        let email_from_address = env::var("EMAIL_FROM_ADDRESS").ok();
        let email_from_name = env::var("EMAIL_FROM_NAME").ok();
        let email_reply_to = env::var("EMAIL_REPLY_TO").ok();

        if email_provider.is_none() || email_from_address.is_none() {
            tracing::warn!(
                "EMAIL_PROVIDER/EMAIL_FROM_ADDRESS not fully configured; outbound send will fail until set"
            );
        }

        let webhook_username = env::var("WEBHOOK_USERNAME").ok();
        let webhook_password = env::var("WEBHOOK_PASSWORD").ok();
        if webhook_username.is_none() || webhook_password.is_none() {
            tracing::warn!(
                "WEBHOOK_USERNAME/WEBHOOK_PASSWORD not set; inbound webhook auth will reject everything"
            );
        }

        let worker_poll_interval_seconds = env::var("WORKER_POLL_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let worker_batch_size = env::var("WORKER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let max_retry_attempts = env::var("MAX_RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let reply_mode = match env::var("REPLY_MODE").as_deref() {
            Ok("simulated") => ReplyMode::Simulated,
            Ok("webhook") | Err(_) => ReplyMode::Webhook,
            Ok(other) => {
                tracing::warn!("unknown REPLY_MODE '{}', defaulting to webhook", other);
                ReplyMode::Webhook
            }
        };

        Self {
            database_url,
            secret_key,
            email_provider,
            email_api_key,
            email_from_address,
            email_from_name,
            email_reply_to,
            webhook_username,
            webhook_password,
            worker_poll_interval_seconds,
            worker_batch_size,
            max_retry_attempts,
            reply_mode,
        }
    }

    fn provider_api_key(provider: Option<&str>) -> Option<String> {
        match provider {
            Some("provider-a") => env::var("PROVIDER_A_API_KEY").ok(),
            Some("provider-b") => env::var("PROVIDER_B_API_KEY").ok(),
            _ => None,
        }
    }
}
