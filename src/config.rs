use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=2.0;
pub const MAX_TOKENS_RANGE: std::ops::RangeInclusive<u32> = 1..=4096;

const DEFAULT_SYSTEM_PROMPT: &str = "You are the friendly assistant on our company website. \
Answer questions about our products, services, pricing and how to get in touch. \
Keep answers short and helpful, and suggest contacting the sales team for anything \
you cannot answer with confidence.";

/// Process configuration, read once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: String,

    /// Credential for the upstream completion API. `None` puts the service
    /// in degraded mode: chat and model listing fail fast.
    pub api_key: Option<String>,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,

    pub default_model: String,
    pub default_temperature: f64,
    pub default_max_tokens: u32,
    pub system_prompt: String,

    pub shutdown_grace: Duration,
    pub static_dir: String,
    pub template_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Config {
            host: get("HOST", "127.0.0.1"),
            port: parse(&lookup, "PORT", 8080)?,
            environment: get("APP_ENV", "development"),

            api_key: lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty()),
            upstream_base_url: get("OPENAI_BASE_URL", "https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            upstream_timeout: Duration::from_secs(parse(&lookup, "UPSTREAM_TIMEOUT_SECS", 60)?),

            default_model: get("DEFAULT_MODEL", "gpt-3.5-turbo"),
            default_temperature: parse(&lookup, "DEFAULT_TEMPERATURE", 0.7)?,
            default_max_tokens: parse(&lookup, "DEFAULT_MAX_TOKENS", 1000)?,
            system_prompt: get("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),

            shutdown_grace: Duration::from_secs(parse(&lookup, "SHUTDOWN_GRACE_SECS", 10)?),
            static_dir: get("STATIC_DIR", "./static"),
            template_dir: get("TEMPLATE_DIR", "templates"),
        };

        if !TEMPERATURE_RANGE.contains(&config.default_temperature) {
            bail!(
                "DEFAULT_TEMPERATURE must be between 0 and 2, got {}",
                config.default_temperature
            );
        }
        if !MAX_TOKENS_RANGE.contains(&config.default_max_tokens) {
            bail!(
                "DEFAULT_MAX_TOKENS must be between 1 and 4096, got {}",
                config.default_max_tokens
            );
        }

        Ok(config)
    }

    pub fn api_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
