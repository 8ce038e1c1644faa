use crate::credentials::Credentials;
use crate::http::build_client;
use crate::shopee::config::SHOPEE_HOST;
use crate::shopee::sign::sign_at;
use reqwest::{Client, RequestBuilder};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShopeeError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("partner api error `{error}`: {message}")]
    Api { error: String, message: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

/// Which base string variant a call is signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignScope {
    /// `partner_id + path + timestamp`
    Partner,
    /// `... + shop_id`, used by the refresh-token call.
    Refresh,
    /// `... + access_token + shop_id`; token and shop id also go on the query.
    Shop,
}

#[derive(Debug, Clone)]
pub struct ShopeeClient {
    host: String,
    http: Client,
}

impl ShopeeClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            http: build_client(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(SHOPEE_HOST.as_str())
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    pub(crate) async fn get_value(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<Value, ShopeeError> {
        let request = self.http.get(self.url(path)).query(query);
        send(request).await
    }

    pub(crate) async fn post_value<B: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
        body: &B,
    ) -> Result<Value, ShopeeError> {
        let request = self.http.post(self.url(path)).query(query).json(body);
        send(request).await
    }
}

/// Common query parameters (`partner_id`, `timestamp`, `sign`, and for shop
/// calls `access_token`, `shop_id`) for a call to `path`.
pub(crate) fn signed_query(
    credentials: &Credentials,
    path: &str,
    scope: SignScope,
    timestamp: i64,
) -> Result<Vec<(&'static str, String)>, ShopeeError> {
    if credentials.api_key.is_empty() {
        return Err(ShopeeError::MissingCredential("api_key"));
    }
    let (token, shop_id) = match scope {
        SignScope::Partner => (None, None),
        SignScope::Refresh => (
            None,
            Some(
                credentials
                    .shop_id
                    .ok_or(ShopeeError::MissingCredential("shop_id"))?,
            ),
        ),
        SignScope::Shop => (
            Some(
                credentials
                    .access_token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or(ShopeeError::MissingCredential("access_token"))?,
            ),
            Some(
                credentials
                    .shop_id
                    .ok_or(ShopeeError::MissingCredential("shop_id"))?,
            ),
        ),
    };
    let signature = sign_at(
        path,
        credentials.partner_id,
        &credentials.api_key,
        token,
        shop_id,
        timestamp,
    );
    let mut query = vec![
        ("partner_id", credentials.partner_id.to_string()),
        ("timestamp", signature.timestamp.to_string()),
        ("sign", signature.sign),
    ];
    if let (SignScope::Shop, Some(token), Some(shop)) = (scope, token, shop_id) {
        query.push(("access_token", token.to_string()));
        query.push(("shop_id", shop.to_string()));
    }
    Ok(query)
}

pub(crate) fn from_payload<T: DeserializeOwned>(value: Value) -> Result<T, ShopeeError> {
    serde_json::from_value(value).map_err(|err| ShopeeError::Deserialize(err.to_string()))
}

async fn send(request: RequestBuilder) -> Result<Value, ShopeeError> {
    let response = request
        .send()
        .await
        .map_err(|err| ShopeeError::Request(err.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| ShopeeError::Request(err.to_string()))?;
    let parsed = serde_json::from_str::<Value>(&body);

    // The partner API reports failures in the `error` field, sometimes with 2xx.
    if let Ok(value) = &parsed
        && let Some(code) = value.get("error").and_then(Value::as_str)
        && !code.is_empty()
    {
        return Err(ShopeeError::Api {
            error: code.to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    if !status.is_success() {
        return Err(ShopeeError::Status(status.as_u16()));
    }
    parsed.map_err(|err| ShopeeError::Deserialize(err.to_string()))
}
