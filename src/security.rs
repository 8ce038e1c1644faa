use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

/// Operator API keys, `label:key` pairs from `SYNC_API_KEYS`.
#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, String>>,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub operator: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("SYNC_API_KEYS").unwrap_or_default();
        Self::from_pairs(&raw)
    }

    pub fn from_pairs(raw: &str) -> Self {
        let mut keys = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((label, key)) if !label.trim().is_empty() && !key.trim().is_empty() => {
                    keys.insert(key.trim().to_string(), label.trim().to_string());
                }
                _ => warn!(
                    target = "marketsync.api",
                    "ignored malformed SYNC_API_KEYS entry"
                ),
            }
        }
        if keys.is_empty() {
            warn!(
                target = "marketsync.api",
                "no operator keys configured; protected routes will reject every request"
            );
        } else {
            info!(
                target = "marketsync.api",
                key_count = keys.len(),
                "loaded operator keys"
            );
        }
        Self {
            keys: Arc::new(keys),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.keys.get(presented).map(|label| AuthContext {
            operator: label.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Sync-Key or Bearer token",
        ));
    };
    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Sync-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn pairs_are_parsed_and_malformed_entries_skipped() {
        let state = AuthState::from_pairs("ops:abc, broken ,ci:def");
        assert_eq!(state.authenticate("abc").unwrap().operator, "ops");
        assert_eq!(state.authenticate("def").unwrap().operator, "ci");
        assert!(state.authenticate("broken").is_none());
    }

    #[test]
    fn bearer_and_header_keys_are_extracted() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc"),
        );
        assert_eq!(extract_api_key(&headers).as_deref(), Some("abc"));

        let mut headers = http::HeaderMap::new();
        headers.insert("X-Sync-Key", HeaderValue::from_static(" def "));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("def"));
    }
}
