//! Runtime configuration, read once from the environment at startup.

use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Public base URL of the site, used to build payment redirect targets.
    pub site_url: String,
    pub payment: PaymentConfig,
    pub rcon: RconConfig,
    pub mojang: MojangConfig,
    pub nats_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub currency: String,
    pub webhook_tolerance: Duration,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct RconConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl RconConfig {
    pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

#[derive(Clone, Debug)]
pub struct MojangConfig {
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for MojangConfig {
    fn default() -> Self { Self { api_base: "https://api.mojang.com".into(), timeout: Duration::from_secs(5) } }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: parsed("PORT", 8083)?,
            site_url: optional("SITE_URL").unwrap_or_else(|| "http://localhost:8083".into()).trim_end_matches('/').to_string(),
            payment: PaymentConfig {
                secret_key: required("STRIPE_SECRET_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                api_base: optional("STRIPE_API_BASE").unwrap_or_else(|| "https://api.stripe.com".into()),
                currency: optional("STORE_CURRENCY").unwrap_or_else(|| "eur".into()).to_lowercase(),
                webhook_tolerance: Duration::from_secs(parsed("STRIPE_WEBHOOK_TOLERANCE_SECS", 300)?),
                timeout: Duration::from_secs(parsed("STRIPE_TIMEOUT_SECS", 15)?),
            },
            rcon: RconConfig {
                host: required("MINECRAFT_RCON_HOST")?,
                port: parsed("MINECRAFT_RCON_PORT", 25575)?,
                password: required("MINECRAFT_RCON_PASSWORD")?,
                timeout: Duration::from_secs(parsed("MINECRAFT_RCON_TIMEOUT_SECS", 60)?),
                max_attempts: parsed("MINECRAFT_RCON_MAX_ATTEMPTS", 3)?,
            },
            mojang: MojangConfig {
                api_base: optional("MOJANG_API_BASE").unwrap_or_else(|| MojangConfig::default().api_base),
                timeout: Duration::from_secs(parsed("MOJANG_TIMEOUT_SECS", 5)?),
            },
            nats_url: optional("NATS_URL"),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).with_context(|| format!("{key} must be set"))
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(v) => v.parse().with_context(|| format!("{key} has an invalid value: {v}")),
        None => Ok(default),
    }
}
