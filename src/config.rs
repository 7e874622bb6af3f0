use anyhow::{bail, Context, Result};

use crate::security::identity::TrustedProxies;

/// Main configuration structure, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Salt for composite identity keys. Required, at least 32 bytes.
    pub server_secret: String,
    pub redis_url: String,
    /// Exact origin allowed by CORS. Unset means permissive (development).
    pub allowed_origin: Option<String>,
    /// Enables the remote moderation API when present.
    pub moderation_api_key: Option<String>,
    /// Proxies whose Cf-Connecting-Ip / X-Forwarded-For headers are
    /// honored. Empty means the socket peer address is always used.
    pub trusted_proxies: TrustedProxies,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let server_secret = match std::env::var("SERVER_SECRET") {
            Ok(secret) => secret,
            Err(_) => bail!("SERVER_SECRET must be set"),
        };
        if server_secret.len() < 32 {
            bail!("SERVER_SECRET must be at least 32 bytes");
        }

        let redis_url = match std::env::var("REDIS_URL") {
            Ok(url) => url,
            Err(_) => bail!("REDIS_URL must be set"),
        };

        let allowed_origin = std::env::var("ALLOWED_ORIGIN").ok().filter(|o| !o.is_empty());
        if allowed_origin.is_none() {
            tracing::warn!("ALLOWED_ORIGIN not set, CORS is permissive (development only)");
        }

        let moderation_api_key = std::env::var("MODERATION_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        let trusted_proxies = match std::env::var("TRUSTED_PROXIES") {
            Ok(list) => TrustedProxies::parse(&list)
                .context("TRUSTED_PROXIES must be a comma-separated list of IPs or CIDR networks")?,
            Err(_) => TrustedProxies::default(),
        };
        if trusted_proxies.is_empty() {
            tracing::warn!(
                "TRUSTED_PROXIES not set, forwarded client-IP headers will be ignored"
            );
        }

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());

        Ok(Self {
            server_secret,
            redis_url,
            allowed_origin,
            moderation_api_key,
            trusted_proxies,
            bind_addr,
        })
    }
}
