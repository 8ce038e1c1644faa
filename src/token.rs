use crate::credentials::Credentials;
use crate::shopee::{ShopeeClient, ShopeeError};
use crate::store::{ErpStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token refresh rejected: {0}")]
    Refresh(#[from] ShopeeError),
    #[error("refreshed token could not be saved: {0}")]
    Persist(#[from] StoreError),
}

/// Returns credentials that are safe to use at `now`.
///
/// When the recorded expiry is missing or within five minutes, the refresh
/// token is exchanged for a new pair, the result is saved, and the refreshed
/// copy is returned. Otherwise `credentials` is handed back untouched.
pub async fn ensure_valid_token(
    client: &ShopeeClient,
    store: &dyn ErpStore,
    credentials: Credentials,
    now: i64,
) -> Result<Credentials, TokenError> {
    if !credentials.needs_refresh(now) {
        return Ok(credentials);
    }

    let grant = match client.refresh_access_token(&credentials, now).await {
        Ok(grant) => grant,
        Err(err) => {
            warn!(target = "marketsync.token", error = %err, "token_refresh_failed");
            return Err(err.into());
        }
    };
    let refreshed =
        credentials.with_tokens(grant.access_token, grant.refresh_token, grant.expire_in, now);
    store.save_credentials(&refreshed).await?;
    info!(
        target = "marketsync.token",
        expiry = refreshed.expiry,
        "access token refreshed"
    );
    Ok(refreshed)
}
