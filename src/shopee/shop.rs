use crate::credentials::Credentials;
use crate::shopee::client::{ShopeeClient, ShopeeError, SignScope, from_payload, signed_query};
use crate::shopee::config::SHOP_INFO_PATH;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShopProfile {
    #[serde(default)]
    pub shop_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ShopeeClient {
    /// `Ok(None)` when the call succeeded but carried no profile.
    pub async fn fetch_shop_info(
        &self,
        credentials: &Credentials,
        timestamp: i64,
    ) -> Result<Option<ShopProfile>, ShopeeError> {
        let query = signed_query(credentials, SHOP_INFO_PATH, SignScope::Shop, timestamp)?;
        let mut payload = self.get_value(SHOP_INFO_PATH, &query).await?;
        match payload.get_mut("response").map(Value::take) {
            Some(Value::Null) | None => Ok(None),
            Some(profile) => from_payload(profile).map(Some),
        }
    }
}
