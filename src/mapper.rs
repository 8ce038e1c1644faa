use crate::models::{NewSalesOrder, SalesOrderItem, SalesOrderStatus};
use crate::shopee::{MarketOrder, OrderItem};
use crate::store::{ErpStore, StoreError};
use chrono::NaiveDate;
use serde::Serialize;
use std::env;
use thiserror::Error;
use tracing::{info, warn};

pub const NAMING_SERIES: &str = "SO-MKT-";
pub const ORDER_TYPE: &str = "Sales";
pub const FALLBACK_WAREHOUSE: &str = "Stores - Local";
pub const GUEST_CUSTOMER: &str = "Marketplace Customer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperOptions {
    /// Create orders as submitted instead of draft.
    pub auto_submit: bool,
    pub guest_customer: String,
    pub fallback_warehouse: String,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            auto_submit: false,
            guest_customer: GUEST_CUSTOMER.to_string(),
            fallback_warehouse: FALLBACK_WAREHOUSE.to_string(),
        }
    }
}

impl MapperOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auto_submit: parse_env_bool("SALES_ORDER_AUTO_SUBMIT"),
            guest_customer: env::var("GUEST_CUSTOMER")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.guest_customer),
            fallback_warehouse: defaults.fallback_warehouse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrderOutcome {
    Created { name: String },
    AlreadyProcessed,
    /// At least one line had no enabled mapping; nothing was written.
    Unmapped { skus: Vec<String> },
    NoItems,
}

impl OrderOutcome {
    pub fn created(&self) -> Option<&str> {
        match self {
            OrderOutcome::Created { name } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("order `{order_sn}` failed: {source}")]
pub struct MapperError {
    pub order_sn: String,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone, Default)]
pub struct OrderMapper {
    options: MapperOptions,
}

impl OrderMapper {
    pub fn new(options: MapperOptions) -> Self {
        Self { options }
    }

    /// Turns a marketplace order into a sales order, at most once per `order_sn`.
    ///
    /// Every line must resolve to an enabled mapping for `platform`; one
    /// unmapped SKU skips the whole order. A unique-key conflict on insert is
    /// reported as [`OrderOutcome::AlreadyProcessed`], same as the pre-check.
    pub async fn create_sales_order(
        &self,
        store: &dyn ErpStore,
        order: &MarketOrder,
        platform: &str,
        warehouse: Option<&str>,
        today: NaiveDate,
    ) -> Result<OrderOutcome, MapperError> {
        let order_sn = order.order_sn.as_str();
        let fail = |source: StoreError| MapperError {
            order_sn: order_sn.to_string(),
            source,
        };

        if store.sales_order_exists(order_sn).await.map_err(fail)? {
            return Ok(OrderOutcome::AlreadyProcessed);
        }

        let customer = self.resolve_customer(store, order).await;

        let warehouse = warehouse
            .filter(|w| !w.trim().is_empty())
            .unwrap_or(self.options.fallback_warehouse.as_str());
        let mut items = Vec::with_capacity(order.item_list.len());
        let mut unmapped = Vec::new();
        for line in &order.item_list {
            let sku = line.item_sku.as_deref().unwrap_or_default();
            match store.find_mapping(sku, platform).await.map_err(fail)? {
                Some(mapping) => items.push(SalesOrderItem {
                    item_code: mapping.erpnext_item,
                    qty: line_quantity(line, mapping.conversion_factor),
                    rate: line.model_original_price.unwrap_or(0.0),
                    warehouse: warehouse.to_string(),
                    delivery_date: today,
                }),
                None => unmapped.push(sku.to_string()),
            }
        }

        if !unmapped.is_empty() {
            warn!(
                target = "marketsync.mapper",
                order_sn,
                platform,
                skus = %unmapped.join(", "),
                "order skipped: unmapped skus"
            );
            return Ok(OrderOutcome::Unmapped { skus: unmapped });
        }
        if items.is_empty() {
            warn!(target = "marketsync.mapper", order_sn, "order skipped: no line items");
            return Ok(OrderOutcome::NoItems);
        }

        let sales_order = NewSalesOrder {
            naming_series: NAMING_SERIES.to_string(),
            customer,
            transaction_date: today,
            order_type: ORDER_TYPE.to_string(),
            market_order_id: order_sn.to_string(),
            status: if self.options.auto_submit {
                SalesOrderStatus::Submitted
            } else {
                SalesOrderStatus::Draft
            },
            items,
        };
        match store.insert_sales_order(&sales_order).await {
            Ok(name) => {
                info!(target = "marketsync.mapper", order_sn, name = %name, "sales order created");
                Ok(OrderOutcome::Created { name })
            }
            Err(StoreError::Conflict(_)) => Ok(OrderOutcome::AlreadyProcessed),
            Err(err) => Err(fail(err)),
        }
    }

    async fn resolve_customer(&self, store: &dyn ErpStore, order: &MarketOrder) -> String {
        let Some(buyer) = order
            .buyer_username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        else {
            return self.options.guest_customer.clone();
        };
        match store.find_or_create_customer(buyer).await {
            Ok(name) => name,
            Err(err) => {
                warn!(
                    target = "marketsync.mapper",
                    order_sn = %order.order_sn,
                    error = %err,
                    "customer_create_failed; using guest customer"
                );
                self.options.guest_customer.clone()
            }
        }
    }
}

/// Marketplace quantity times conversion factor. Missing or zero values count as 1.
fn line_quantity(line: &OrderItem, conversion_factor: Option<f64>) -> f64 {
    let quantity = line.model_quantity.filter(|q| *q != 0.0).unwrap_or(1.0);
    let factor = conversion_factor.filter(|f| *f != 0.0).unwrap_or(1.0);
    quantity * factor
}

fn parse_env_bool(key: &str) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Settings;
    use crate::models::SkuMapping;
    use crate::store::MemoryStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn mapping(sku: &str, item: &str, factor: Option<f64>) -> SkuMapping {
        SkuMapping {
            marketplace_sku: sku.into(),
            marketplace: "Shopee".into(),
            erpnext_item: item.into(),
            conversion_factor: factor,
            enabled: true,
        }
    }

    fn line(sku: &str, qty: Option<f64>, price: Option<f64>) -> OrderItem {
        OrderItem {
            item_sku: Some(sku.into()),
            model_quantity: qty,
            model_original_price: price,
        }
    }

    fn mock_order() -> MarketOrder {
        MarketOrder {
            order_sn: "MOCK-1".into(),
            buyer_username: Some("Alice".into()),
            item_list: vec![line("TEST-SKU-001", Some(1.0), Some(499.0))],
        }
    }

    fn store_with(mappings: Vec<SkuMapping>) -> MemoryStore {
        MemoryStore::new(Settings::default(), mappings)
    }

    #[tokio::test]
    async fn mock_order_becomes_one_line_sales_order() {
        let store = store_with(vec![mapping("TEST-SKU-001", "ITEM-001", Some(1.0))]);
        let mapper = OrderMapper::default();
        let outcome = mapper
            .create_sales_order(&store, &mock_order(), "Shopee", None, today())
            .await
            .unwrap();
        assert!(outcome.created().is_some());

        let orders = store.sales_orders().await;
        assert_eq!(orders.len(), 1);
        let so = &orders[0];
        assert_eq!(so.order.market_order_id, "MOCK-1");
        assert_eq!(so.order.customer, "Alice");
        assert_eq!(so.order.status, SalesOrderStatus::Draft);
        assert_eq!(so.order.items.len(), 1);
        assert_eq!(so.order.items[0].item_code, "ITEM-001");
        assert_eq!(so.order.items[0].qty, 1.0);
        assert_eq!(so.order.items[0].rate, 499.0);
        assert_eq!(so.order.items[0].warehouse, FALLBACK_WAREHOUSE);
        assert!(so.name.starts_with(NAMING_SERIES));
    }

    #[tokio::test]
    async fn second_call_is_already_processed() {
        let store = store_with(vec![mapping("TEST-SKU-001", "ITEM-001", Some(1.0))]);
        let mapper = OrderMapper::default();
        mapper
            .create_sales_order(&store, &mock_order(), "Shopee", None, today())
            .await
            .unwrap();
        let again = mapper
            .create_sales_order(&store, &mock_order(), "Shopee", None, today())
            .await
            .unwrap();
        assert_eq!(again, OrderOutcome::AlreadyProcessed);
        assert_eq!(store.sales_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn insert_conflict_is_already_processed() {
        let store = store_with(vec![mapping("TEST-SKU-001", "ITEM-001", Some(1.0))]);
        store.skip_existence_check().await;
        let mapper = OrderMapper::default();
        let first = mapper
            .create_sales_order(&store, &mock_order(), "Shopee", None, today())
            .await
            .unwrap();
        assert!(first.created().is_some());
        let second = mapper
            .create_sales_order(&store, &mock_order(), "Shopee", None, today())
            .await
            .unwrap();
        assert_eq!(second, OrderOutcome::AlreadyProcessed);
        assert_eq!(store.sales_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn any_unmapped_sku_skips_whole_order() {
        let store = store_with(vec![mapping("A", "ITEM-A", None)]);
        let order = MarketOrder {
            order_sn: "X".into(),
            buyer_username: None,
            item_list: vec![line("A", Some(2.0), Some(1.0)), line("B", Some(1.0), Some(1.0))],
        };
        let outcome = OrderMapper::default()
            .create_sales_order(&store, &order, "Shopee", None, today())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            OrderOutcome::Unmapped {
                skus: vec!["B".to_string()]
            }
        );
        assert!(store.sales_orders().await.is_empty());
    }

    #[tokio::test]
    async fn conversion_factor_and_defaults_apply() {
        let store = store_with(vec![
            mapping("BOX", "ITEM-UNIT", Some(12.0)),
            mapping("LOOSE", "ITEM-LOOSE", None),
        ]);
        let order = MarketOrder {
            order_sn: "Q".into(),
            buyer_username: Some("bob".into()),
            item_list: vec![line("BOX", Some(2.0), Some(30.0)), line("LOOSE", None, None)],
        };
        OrderMapper::default()
            .create_sales_order(&store, &order, "Shopee", Some("Main - W"), today())
            .await
            .unwrap();
        let so = &store.sales_orders().await[0];
        assert_eq!(so.order.items[0].qty, 24.0);
        assert_eq!(so.order.items[1].qty, 1.0);
        assert_eq!(so.order.items[1].rate, 0.0);
        assert_eq!(so.order.items[0].warehouse, "Main - W");
    }

    #[tokio::test]
    async fn customer_failure_falls_back_to_guest() {
        let store = store_with(vec![mapping("TEST-SKU-001", "ITEM-001", None)]);
        store.fail_customer_creation().await;
        OrderMapper::default()
            .create_sales_order(&store, &mock_order(), "Shopee", None, today())
            .await
            .unwrap();
        assert_eq!(store.sales_orders().await[0].order.customer, GUEST_CUSTOMER);
    }

    #[tokio::test]
    async fn auto_submit_is_configurable() {
        let store = store_with(vec![mapping("TEST-SKU-001", "ITEM-001", None)]);
        let mapper = OrderMapper::new(MapperOptions {
            auto_submit: true,
            ..MapperOptions::default()
        });
        mapper
            .create_sales_order(&store, &mock_order(), "Shopee", None, today())
            .await
            .unwrap();
        assert_eq!(
            store.sales_orders().await[0].order.status,
            SalesOrderStatus::Submitted
        );
    }

    #[tokio::test]
    async fn insert_failure_is_an_error() {
        let store = store_with(vec![mapping("TEST-SKU-001", "ITEM-001", None)]);
        store.fail_inserts_for("MOCK-1").await;
        let err = OrderMapper::default()
            .create_sales_order(&store, &mock_order(), "Shopee", None, today())
            .await
            .unwrap_err();
        assert_eq!(err.order_sn, "MOCK-1");
    }

    #[tokio::test]
    async fn order_without_items_is_skipped() {
        let store = store_with(Vec::new());
        let order = MarketOrder {
            order_sn: "E".into(),
            buyer_username: None,
            item_list: Vec::new(),
        };
        let outcome = OrderMapper::default()
            .create_sales_order(&store, &order, "Shopee", None, today())
            .await
            .unwrap();
        assert_eq!(outcome, OrderOutcome::NoItems);
    }
}
