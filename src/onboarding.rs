use crate::shopee::config::CALLBACK_URL;
use crate::shopee::{ShopeeClient, ShopeeError};
use crate::store::{ErpStore, StoreError};
use thiserror::Error;
use tracing::{error, info, warn};

/// Shown to the shop owner when the callback cannot complete.
pub const EXCHANGE_FAILED_MESSAGE: &str = "Token exchange failed. Check Error Logs.";

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token exchange rejected: {0}")]
    Shopee(#[from] ShopeeError),
    #[error("settings unavailable: {0}")]
    Store(#[from] StoreError),
}

impl ExchangeError {
    pub fn user_message(&self) -> &'static str {
        EXCHANGE_FAILED_MESSAGE
    }
}

/// Authorization URL for the configured partner, redirecting back to this service.
pub async fn initiate_auth(
    client: &ShopeeClient,
    store: &dyn ErpStore,
    now: i64,
) -> Result<String, ExchangeError> {
    let settings = store.load_settings().await?;
    Ok(client.auth_url(&settings.credentials, CALLBACK_URL.as_str(), now)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub shop_id: u64,
    pub shop_name: Option<String>,
}

/// Completes the OAuth round trip: swaps the one-time `code` for tokens,
/// stores them with the shop id, then records the shop's display name.
/// A failed profile lookup is logged and does not undo the exchange.
pub async fn exchange_code_for_token(
    client: &ShopeeClient,
    store: &dyn ErpStore,
    code: &str,
    shop_id: u64,
    now: i64,
) -> Result<ExchangeOutcome, ExchangeError> {
    let settings = store.load_settings().await?;
    let grant = match client
        .get_token(&settings.credentials, code, shop_id, now)
        .await
    {
        Ok(grant) => grant,
        Err(err) => {
            error!(target = "marketsync.auth", shop_id, error = %err, "token_exchange_failed");
            return Err(err.into());
        }
    };

    let mut credentials =
        settings
            .credentials
            .with_tokens(grant.access_token, grant.refresh_token, grant.expire_in, now);
    credentials.shop_id = Some(shop_id);
    store.save_credentials(&credentials).await?;

    let shop_name = match client.fetch_shop_info(&credentials, now).await {
        Ok(Some(profile)) => profile.shop_name,
        Ok(None) => None,
        Err(err) => {
            warn!(target = "marketsync.auth", shop_id, error = %err, "shop_info_unavailable");
            None
        }
    };
    if let Some(name) = &shop_name
        && let Err(err) = store.save_shop_name(name).await
    {
        warn!(target = "marketsync.auth", shop_id, error = %err, "shop_name_not_saved");
    }

    info!(
        target = "marketsync.auth",
        shop_id,
        shop_name = shop_name.as_deref().unwrap_or(""),
        "shop authorised"
    );
    Ok(ExchangeOutcome { shop_id, shop_name })
}
