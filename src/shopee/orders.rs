use crate::credentials::Credentials;
use crate::shopee::client::{ShopeeClient, ShopeeError, SignScope, from_payload, signed_query};
use crate::shopee::config::{ORDER_DETAIL_PATH, ORDER_LIST_PATH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

pub const READY_TO_SHIP: &str = "READY_TO_SHIP";
pub const LIST_WINDOW_SECS: i64 = 86_400;
pub const PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}

impl TimeWindow {
    /// The 24 hours leading up to `now`.
    pub fn trailing_day(now: i64) -> Self {
        Self {
            from: now - LIST_WINDOW_SECS,
            to: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderSummary {
    pub order_sn: String,
    #[serde(default)]
    pub order_status: Option<String>,
}

/// Result of the list call. `raw` is the untouched payload, kept for the sync log.
#[derive(Debug, Clone)]
pub struct OrderList {
    pub orders: Vec<OrderSummary>,
    pub raw: Value,
}

impl OrderList {
    pub fn order_ids(&self) -> Vec<String> {
        self.orders.iter().map(|o| o.order_sn.clone()).collect()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketOrder {
    pub order_sn: String,
    #[serde(default)]
    pub buyer_username: Option<String>,
    #[serde(default)]
    pub item_list: Vec<OrderItem>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderItem {
    #[serde(default)]
    pub item_sku: Option<String>,
    #[serde(default, alias = "model_quantity_purchased")]
    pub model_quantity: Option<f64>,
    #[serde(default)]
    pub model_original_price: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OrderListResponse {
    #[serde(default)]
    order_list: Vec<OrderSummary>,
}

#[derive(Debug, Default, Deserialize)]
struct OrderDetailResponse {
    #[serde(default)]
    order_list: Vec<MarketOrder>,
}

impl ShopeeClient {
    /// Orders in `READY_TO_SHIP` created inside `window`. An empty list is not an error.
    pub async fn list_ready_orders(
        &self,
        credentials: &Credentials,
        window: TimeWindow,
        timestamp: i64,
    ) -> Result<OrderList, ShopeeError> {
        let mut query = signed_query(credentials, ORDER_LIST_PATH, SignScope::Shop, timestamp)?;
        query.extend([
            ("time_range_field", "create_time".to_string()),
            ("time_from", window.from.to_string()),
            ("time_to", window.to.to_string()),
            ("page_size", PAGE_SIZE.to_string()),
            ("order_status", READY_TO_SHIP.to_string()),
        ]);
        let raw = self.get_value(ORDER_LIST_PATH, &query).await?;
        let response: OrderListResponse = response_field(&raw)?;
        Ok(OrderList {
            orders: response.order_list,
            raw,
        })
    }

    pub async fn get_order_details(
        &self,
        credentials: &Credentials,
        order_ids: &[String],
        timestamp: i64,
    ) -> Result<Vec<MarketOrder>, ShopeeError> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = signed_query(credentials, ORDER_DETAIL_PATH, SignScope::Shop, timestamp)?;
        query.extend([
            ("order_sn_list", order_ids.join(",")),
            ("response_optional_fields", "item_list".to_string()),
        ]);
        let raw = self.get_value(ORDER_DETAIL_PATH, &query).await?;
        let response: OrderDetailResponse = response_field(&raw)?;
        Ok(response.order_list)
    }
}

fn response_field<T: Default + for<'de> Deserialize<'de>>(raw: &Value) -> Result<T, ShopeeError> {
    match raw.get("response") {
        Some(Value::Null) | None => Ok(T::default()),
        Some(value) => from_payload(value.clone()),
    }
}
