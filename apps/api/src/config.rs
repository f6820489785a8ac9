use anyhow::{bail, Context, Result};

use crate::outreach::dispatch::DispatchMode;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub smtp: SmtpConfig,
    pub email_subject: String,
    pub email_body_template: String,
    pub queue_name: String,
    /// Names this process's in-flight list. Stable across restarts, unique per live process.
    pub instance_id: String,
    pub worker_concurrency: usize,
    pub dispatch_mode: DispatchMode,
    pub app_base_url: String,
    pub port: u16,
    pub rust_log: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let smtp_username = require_env("SMTP_USERNAME")?;
        let smtp = SmtpConfig {
            host: require_env("SMTP_HOST")?,
            port: parse_env("SMTP_PORT", 587)?,
            from: optional_env("MAIL_FROM").unwrap_or_else(|| smtp_username.clone()),
            username: smtp_username,
            password: require_env("SMTP_PASSWORD")?,
        };

        let worker_concurrency: usize = parse_env("WORKER_CONCURRENCY", 4)?;
        if worker_concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }

        let dispatch_mode = match optional_env("DISPATCH_MODE") {
            Some(raw) => raw
                .parse::<DispatchMode>()
                .with_context(|| format!("DISPATCH_MODE '{raw}' is not 'claim' or 'repeat'"))?,
            None => DispatchMode::Claim,
        };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            jwt_secret: require_env("JWT_SECRET")?,
            jwt_ttl_hours: parse_env("JWT_TTL_HOURS", 24)?,
            smtp,
            email_subject: optional_env("EMAIL_SUBJECT")
                .unwrap_or_else(|| "Email Campaign".to_string()),
            email_body_template: optional_env("EMAIL_BODY_TEMPLATE")
                .unwrap_or_else(|| "Hello {name}, this is a test email campaign!".to_string()),
            queue_name: optional_env("QUEUE_NAME").unwrap_or_else(|| "emailQueue".to_string()),
            instance_id: optional_env("INSTANCE_ID")
                .or_else(|| optional_env("HOSTNAME"))
                .unwrap_or_else(|| "default".to_string()),
            worker_concurrency,
            dispatch_mode,
            app_base_url: optional_env("APP_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
