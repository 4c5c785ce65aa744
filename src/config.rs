//! Application configuration
//! Mission: Read the service settings from the environment and reject bad values early

use crate::middleware::rate_limit::RateLimitConfig;
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub session_ttl: Duration,
    pub rate_limit: RateLimitConfig,
    pub trust_proxy_headers: bool,
    pub provider_timeout: Duration,
    /// External sign-in answers 503 when unset
    pub google_client_id: Option<String>,
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset and blank values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let jwt_secret = match lookup("JWT_SECRET") {
            Some(secret) if secret.trim().is_empty() => bail!("JWT_SECRET must not be empty"),
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET not set, using the development secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let session_ttl_secs = parse_or(var("SESSION_TTL_SECS"), "SESSION_TTL_SECS", 3600u64)?;
        if session_ttl_secs == 0 {
            bail!("SESSION_TTL_SECS must be greater than zero");
        }

        let max_requests = parse_or(
            var("RATE_LIMIT_MAX_REQUESTS"),
            "RATE_LIMIT_MAX_REQUESTS",
            100u32,
        )?;
        if max_requests == 0 {
            bail!("RATE_LIMIT_MAX_REQUESTS must be greater than zero");
        }

        let window_secs = parse_or(var("RATE_LIMIT_WINDOW_SECS"), "RATE_LIMIT_WINDOW_SECS", 60u64)?;
        if window_secs == 0 {
            bail!("RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }

        let trust_proxy_headers = var("TRUST_PROXY_HEADERS")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);

        let provider_timeout_ms =
            parse_or(var("PROVIDER_TIMEOUT_MS"), "PROVIDER_TIMEOUT_MS", 5000u64)?;

        let google_client_id = var("GOOGLE_CLIENT_ID").filter(|v| !v.is_empty());

        let bind_addr = var("BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("Invalid BIND_ADDR")?;

        Ok(Self {
            jwt_secret,
            session_ttl: Duration::from_secs(session_ttl_secs),
            rate_limit: RateLimitConfig {
                max_requests,
                window: Duration::from_secs(window_secs),
            },
            trust_proxy_headers,
            provider_timeout: Duration::from_millis(provider_timeout_ms),
            google_client_id,
            bind_addr,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw.filter(|v| !v.is_empty()) {
        Some(v) => v.parse::<T>().with_context(|| format!("Invalid {key}: {v:?}")),
        None => Ok(default),
    }
}
