use crate::credentials::{Credentials, Settings};
use crate::http::build_client;
use crate::models::{NewSalesOrder, SkuMapping, SyncLogEntry};
use crate::store::{ErpStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use urlencoding::encode;

const SETTINGS_ROW_ID: i64 = 1;

/// PostgREST-backed store. `sales_order.market_order_id` carries a unique
/// constraint; a 409 on insert is reported as [`StoreError::Conflict`].
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    base_url: String,
    service_key: String,
    http: Client,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct SettingsRow {
    #[serde(default)]
    partner_id: Option<u64>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expiry_time: Option<i64>,
    #[serde(default)]
    shop_id: Option<u64>,
    #[serde(default)]
    shop_name: Option<String>,
    #[serde(default)]
    default_warehouse: Option<String>,
}

impl From<SettingsRow> for Settings {
    fn from(row: SettingsRow) -> Self {
        Settings {
            credentials: Credentials {
                partner_id: row.partner_id.unwrap_or_default(),
                api_key: row.api_key.unwrap_or_default(),
                access_token: row.access_token,
                refresh_token: row.refresh_token,
                expiry: row.expiry_time,
                shop_id: row.shop_id,
            },
            shop_name: row.shop_name,
            default_warehouse: row.default_warehouse,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsertedOrder {
    name: String,
}

impl SupabaseStore {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            http: build_client(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self::new(base_url, service_key))
    }

    fn table(&self, table: &str, filter: &str) -> String {
        if filter.is_empty() {
            format!("{}/rest/v1/{table}", self.base_url)
        } else {
            format!("{}/rest/v1/{table}?{filter}", self.base_url)
        }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, StoreError> {
        let response = self
            .authed(self.http.get(url))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        let response = check(response)?;
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    async fn patch_settings(&self, body: serde_json::Value) -> Result<(), StoreError> {
        let url = self.table("marketplace_settings", &format!("id=eq.{SETTINGS_ROW_ID}"));
        let response = self
            .authed(self.http.patch(url))
            .json(&body)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        check(response).map(|_| ())
    }
}

fn check(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(StoreError::Request(format!("HTTP {}", response.status())))
    }
}

#[async_trait]
impl ErpStore for SupabaseStore {
    async fn load_settings(&self) -> Result<Settings, StoreError> {
        let url = self.table(
            "marketplace_settings",
            &format!("id=eq.{SETTINGS_ROW_ID}&select=*&limit=1"),
        );
        let mut rows: Vec<SettingsRow> = self.fetch_rows(url).await?;
        rows.pop().map(Settings::from).ok_or(StoreError::MissingSettings)
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<(), StoreError> {
        self.patch_settings(json!({
            "partner_id": credentials.partner_id,
            "access_token": credentials.access_token,
            "refresh_token": credentials.refresh_token,
            "expiry_time": credentials.expiry,
            "shop_id": credentials.shop_id,
        }))
        .await
    }

    async fn save_shop_name(&self, shop_name: &str) -> Result<(), StoreError> {
        self.patch_settings(json!({ "shop_name": shop_name })).await
    }

    async fn find_mapping(
        &self,
        sku: &str,
        platform: &str,
    ) -> Result<Option<SkuMapping>, StoreError> {
        let url = self.table(
            "marketplace_item_mapping",
            &format!(
                "marketplace_sku=eq.{}&marketplace=eq.{}&enabled=is.true&select=*&limit=1",
                encode(sku),
                encode(platform)
            ),
        );
        let mut rows: Vec<SkuMapping> = self.fetch_rows(url).await?;
        Ok(rows.pop())
    }

    async fn sales_order_exists(&self, market_order_id: &str) -> Result<bool, StoreError> {
        let url = self.table(
            "sales_order",
            &format!(
                "market_order_id=eq.{}&select=name&limit=1",
                encode(market_order_id)
            ),
        );
        let rows: Vec<InsertedOrder> = self.fetch_rows(url).await?;
        Ok(!rows.is_empty())
    }

    async fn find_or_create_customer(&self, name: &str) -> Result<String, StoreError> {
        let url = self.table("customer", "on_conflict=customer_name");
        let response = self
            .authed(self.http.post(url))
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&json!({ "customer_name": name }))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        check(response)?;
        Ok(name.to_string())
    }

    async fn insert_sales_order(&self, order: &NewSalesOrder) -> Result<String, StoreError> {
        let url = self.table("sales_order", "");
        let response = self
            .authed(self.http.post(url))
            .header("Prefer", "return=representation")
            .json(order)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if response.status() == StatusCode::CONFLICT {
            return Err(StoreError::Conflict(order.market_order_id.clone()));
        }
        let response = check(response)?;
        let mut rows: Vec<InsertedOrder> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        rows.pop()
            .map(|row| row.name)
            .ok_or_else(|| StoreError::Deserialize("insert returned no row".into()))
    }

    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<(), StoreError> {
        let url = self.table("marketplace_sync_log", "");
        let response = self
            .authed(self.http.post(url))
            .header("Prefer", "return=minimal")
            .json(entry)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        check(response).map(|_| ())
    }

    async fn recent_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>, StoreError> {
        let url = self.table(
            "marketplace_sync_log",
            &format!("select=*&order=sync_date.desc&limit={limit}"),
        );
        self.fetch_rows(url).await
    }

    async fn prune_sync_logs(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let url = self.table(
            "marketplace_sync_log",
            &format!(
                "sync_date=lt.{}",
                encode(&cutoff.to_rfc3339_opts(SecondsFormat::Secs, true))
            ),
        );
        let response = self
            .authed(self.http.delete(url))
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        let response = check(response)?;
        let removed: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SalesOrderStatus;
    use crate::testing::serve;
    use axum::{
        Json, Router,
        extract::Query,
        http::StatusCode,
        routing::{get, post},
    };
    use chrono::NaiveDate;
    use serde_json::Value;
    use std::collections::HashMap;

    fn order(id: &str) -> NewSalesOrder {
        NewSalesOrder {
            naming_series: "SO-MKT-".into(),
            customer: "Alice".into(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            order_type: "Sales".into(),
            market_order_id: id.into(),
            status: SalesOrderStatus::Draft,
            items: Vec::new(),
        }
    }

    #[tokio::test]
    async fn conflict_on_insert_maps_to_conflict() {
        let router = Router::new().route(
            "/rest/v1/sales_order",
            post(|Json(body): Json<Value>| async move {
                if body["market_order_id"] == "DUP" {
                    (StatusCode::CONFLICT, Json(json!({"code": "23505"})))
                } else {
                    (StatusCode::CREATED, Json(json!([{"name": "SO-MKT-00042"}])))
                }
            }),
        );
        let store = SupabaseStore::new(serve(router).await, "service");
        assert_eq!(
            store.insert_sales_order(&order("NEW")).await.unwrap(),
            "SO-MKT-00042"
        );
        let err = store.insert_sales_order(&order("DUP")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(id) if id == "DUP"));
    }

    #[tokio::test]
    async fn settings_row_maps_to_credentials() {
        let router = Router::new().route(
            "/rest/v1/marketplace_settings",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("id").map(String::as_str), Some("eq.1"));
                Json(json!([{
                    "partner_id": 2001,
                    "api_key": "k",
                    "access_token": "tok",
                    "refresh_token": "ref",
                    "expiry_time": 1700000000,
                    "shop_id": 77,
                    "shop_name": "Acme",
                    "default_warehouse": "Main - W"
                }]))
            }),
        );
        let store = SupabaseStore::new(serve(router).await, "service");
        let settings = store.load_settings().await.unwrap();
        assert_eq!(settings.credentials.partner_id, 2001);
        assert_eq!(settings.credentials.shop_id, Some(77));
        assert_eq!(settings.credentials.expiry, Some(1_700_000_000));
        assert_eq!(settings.default_warehouse.as_deref(), Some("Main - W"));
    }

    #[tokio::test]
    async fn mapping_lookup_filters_enabled_rows() {
        let router = Router::new().route(
            "/rest/v1/marketplace_item_mapping",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("enabled").map(String::as_str), Some("is.true"));
                if q.get("marketplace_sku").map(String::as_str) == Some("eq.SKU 1") {
                    Json(json!([{
                        "marketplace_sku": "SKU 1",
                        "marketplace": "Shopee",
                        "erpnext_item": "ITEM-1",
                        "conversion_factor": 3.0,
                        "enabled": true
                    }]))
                } else {
                    Json(json!([]))
                }
            }),
        );
        let store = SupabaseStore::new(serve(router).await, "service");
        let found = store.find_mapping("SKU 1", "Shopee").await.unwrap().unwrap();
        assert_eq!(found.erpnext_item, "ITEM-1");
        assert!(store.find_mapping("OTHER", "Shopee").await.unwrap().is_none());
    }
}
