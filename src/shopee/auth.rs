use crate::credentials::Credentials;
use crate::shopee::client::{ShopeeClient, ShopeeError, SignScope, from_payload, signed_query};
use crate::shopee::config::{ACCESS_TOKEN_GET_PATH, AUTH_PARTNER_PATH, TOKEN_GET_PATH};
use serde::{Deserialize, Serialize};
use urlencoding::encode;

/// Tokens issued by either the code exchange or the refresh call.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expire_in: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CodeExchangeBody<'a> {
    code: &'a str,
    shop_id: u64,
    partner_id: u64,
}

#[derive(Debug, Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
    partner_id: u64,
    shop_id: u64,
}

impl ShopeeClient {
    /// Authorization page the shop owner is sent to. Pure; no request is made.
    pub fn auth_url(
        &self,
        credentials: &Credentials,
        redirect: &str,
        timestamp: i64,
    ) -> Result<String, ShopeeError> {
        let query = signed_query(credentials, AUTH_PARTNER_PATH, SignScope::Partner, timestamp)?;
        let mut url = self.url(AUTH_PARTNER_PATH);
        url.push('?');
        for (key, value) in &query {
            url.push_str(key);
            url.push('=');
            url.push_str(value);
            url.push('&');
        }
        url.push_str("redirect=");
        url.push_str(&encode(redirect));
        Ok(url)
    }

    pub async fn get_token(
        &self,
        credentials: &Credentials,
        code: &str,
        shop_id: u64,
        timestamp: i64,
    ) -> Result<TokenGrant, ShopeeError> {
        let query = signed_query(credentials, TOKEN_GET_PATH, SignScope::Partner, timestamp)?;
        let body = CodeExchangeBody {
            code,
            shop_id,
            partner_id: credentials.partner_id,
        };
        let payload = self.post_value(TOKEN_GET_PATH, &query, &body).await?;
        non_empty(from_payload(payload)?)
    }

    pub async fn refresh_access_token(
        &self,
        credentials: &Credentials,
        timestamp: i64,
    ) -> Result<TokenGrant, ShopeeError> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ShopeeError::MissingCredential("refresh_token"))?;
        let shop_id = credentials
            .shop_id
            .ok_or(ShopeeError::MissingCredential("shop_id"))?;
        let query = signed_query(
            credentials,
            ACCESS_TOKEN_GET_PATH,
            SignScope::Refresh,
            timestamp,
        )?;
        let body = RefreshBody {
            refresh_token,
            partner_id: credentials.partner_id,
            shop_id,
        };
        let payload = self.post_value(ACCESS_TOKEN_GET_PATH, &query, &body).await?;
        non_empty(from_payload(payload)?)
    }
}

fn non_empty(grant: TokenGrant) -> Result<TokenGrant, ShopeeError> {
    if grant.access_token.is_empty() {
        return Err(ShopeeError::Api {
            error: "empty_access_token".into(),
            message: "token response carried no access_token".into(),
        });
    }
    Ok(grant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shopee::sign::sign_at;
    use crate::testing::serve;
    use axum::{
        Json, Router,
        extract::Query,
        routing::post,
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn creds() -> Credentials {
        Credentials {
            partner_id: 2001,
            api_key: "key".into(),
            access_token: None,
            refresh_token: Some("refresh-1".into()),
            expiry: None,
            shop_id: Some(77),
        }
    }

    #[test]
    fn auth_url_embeds_signature_and_redirect() {
        let client = ShopeeClient::new("https://partner.example.com");
        let url = client
            .auth_url(&creds(), "https://erp.example.com/auth_callback", 1000)
            .unwrap();
        let sign = sign_at(AUTH_PARTNER_PATH, 2001, "key", None, None, 1000).sign;
        assert!(url.starts_with("https://partner.example.com/api/v2/shop/auth_partner?"));
        assert!(url.contains("partner_id=2001"));
        assert!(url.contains("timestamp=1000"));
        assert!(url.contains(&format!("sign={sign}")));
        assert!(url.ends_with("redirect=https%3A%2F%2Ferp.example.com%2Fauth_callback"));
    }

    #[tokio::test]
    async fn refresh_posts_signed_body() {
        let router = Router::new().route(
            ACCESS_TOKEN_GET_PATH,
            post(
                |Query(q): Query<HashMap<String, String>>, Json(body): Json<Value>| async move {
                    let expected = sign_at(ACCESS_TOKEN_GET_PATH, 2001, "key", None, Some(77), 500).sign;
                    if q.get("sign") != Some(&expected) || body["refresh_token"] != "refresh-1" {
                        return Json(json!({"error": "error_sign", "message": "bad sign"}));
                    }
                    Json(json!({
                        "error": "",
                        "access_token": "access-2",
                        "refresh_token": "refresh-2",
                        "expire_in": 3600,
                    }))
                },
            ),
        );
        let client = ShopeeClient::new(serve(router).await);
        let grant = client.refresh_access_token(&creds(), 500).await.unwrap();
        assert_eq!(grant.access_token, "access-2");
        assert_eq!(grant.refresh_token, "refresh-2");
        assert_eq!(grant.expire_in, Some(3600));
    }

    #[tokio::test]
    async fn api_error_field_is_surfaced() {
        let router = Router::new().route(
            TOKEN_GET_PATH,
            post(|| async {
                Json(json!({"error": "error_auth", "message": "invalid code"}))
            }),
        );
        let client = ShopeeClient::new(serve(router).await);
        let err = client.get_token(&creds(), "code", 77, 1).await.unwrap_err();
        match err {
            ShopeeError::Api { error, message } => {
                assert_eq!(error, "error_auth");
                assert_eq!(message, "invalid code");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_without_token_fails_locally() {
        let mut c = creds();
        c.refresh_token = None;
        let client = ShopeeClient::new("http://127.0.0.1:9");
        let err = client.refresh_access_token(&c, 1).await.unwrap_err();
        assert!(matches!(err, ShopeeError::MissingCredential("refresh_token")));
    }
}
