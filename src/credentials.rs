use serde::{Deserialize, Serialize};
use std::{env, fmt};

/// Seconds before expiry at which a token is treated as stale.
pub const REFRESH_MARGIN_SECS: i64 = 300;
/// Token lifetime assumed when the partner API omits `expire_in` or sends a non-positive one.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 14_400;

/// Partner and shop credentials. Passed around by value; the token manager
/// hands back a refreshed copy instead of mutating shared state.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub partner_id: u64,
    pub api_key: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    pub expiry: Option<i64>,
    #[serde(default)]
    pub shop_id: Option<u64>,
}

impl Credentials {
    pub fn needs_refresh(&self, now: i64) -> bool {
        match self.expiry {
            Some(expiry) => now > expiry.saturating_sub(REFRESH_MARGIN_SECS),
            None => true,
        }
    }

    pub fn with_tokens(
        mut self,
        access_token: String,
        refresh_token: String,
        expires_in: Option<i64>,
        issued_at: i64,
    ) -> Self {
        self.access_token = Some(access_token);
        self.refresh_token = Some(refresh_token);
        let ttl = expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        self.expiry = Some(issued_at.saturating_add(ttl));
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("partner_id", &self.partner_id)
            .field("api_key", &redact(Some(&self.api_key)))
            .field("access_token", &redact(self.access_token.as_deref()))
            .field("refresh_token", &redact(self.refresh_token.as_deref()))
            .field("expiry", &self.expiry)
            .field("shop_id", &self.shop_id)
            .finish()
    }
}

fn redact(value: Option<&str>) -> &'static str {
    match value {
        Some(v) if !v.is_empty() => "***",
        _ => "<unset>",
    }
}

/// The single settings record of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub credentials: Credentials,
    #[serde(default)]
    pub shop_name: Option<String>,
    #[serde(default)]
    pub default_warehouse: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        let credentials = Credentials {
            partner_id: env_parse("SHOPEE_PARTNER_ID").unwrap_or_default(),
            api_key: env::var("SHOPEE_API_KEY").unwrap_or_default(),
            access_token: env_string("SHOPEE_ACCESS_TOKEN"),
            refresh_token: env_string("SHOPEE_REFRESH_TOKEN"),
            expiry: env_parse("SHOPEE_TOKEN_EXPIRY"),
            shop_id: env_parse("SHOPEE_SHOP_ID"),
        };
        Self {
            credentials,
            shop_name: env_string("SHOPEE_SHOP_NAME"),
            default_warehouse: env_string("DEFAULT_WAREHOUSE"),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
