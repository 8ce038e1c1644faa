use crate::credentials::{Credentials, Settings};
use crate::models::{NewSalesOrder, SalesOrder, SkuMapping, SyncLogEntry};
use crate::store::{ErpStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::info;

/// Process-local store. Used when no database is configured, and by tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    settings: Option<Settings>,
    mappings: Vec<SkuMapping>,
    customers: HashSet<String>,
    sales_orders: HashMap<String, SalesOrder>,
    next_order: u32,
    logs: Vec<SyncLogEntry>,
    #[cfg(test)]
    failing_orders: HashSet<String>,
    #[cfg(test)]
    failing_customers: bool,
    #[cfg(test)]
    skip_existence_check: bool,
    #[cfg(test)]
    failing_shop_name: bool,
}

impl MemoryStore {
    pub fn new(settings: Settings, mappings: Vec<SkuMapping>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                settings: Some(settings),
                mappings,
                ..Inner::default()
            })),
        }
    }

    /// Settings from the environment plus mappings from `SKU_MAPPINGS_FILE` (YAML list).
    pub fn from_env() -> Result<Self, StoreError> {
        let mappings = match std::env::var("SKU_MAPPINGS_FILE") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|err| StoreError::Request(format!("{path}: {err}")))?;
                parse_mappings(&raw)?
            }
            Err(_) => Vec::new(),
        };
        info!(
            target = "marketsync.store",
            mapping_count = mappings.len(),
            "memory store initialised"
        );
        Ok(Self::new(Settings::from_env(), mappings))
    }

    pub async fn sales_orders(&self) -> Vec<SalesOrder> {
        let guard = self.inner.lock().await;
        let mut orders: Vec<SalesOrder> = guard.sales_orders.values().cloned().collect();
        orders.sort_by(|a, b| a.name.cmp(&b.name));
        orders
    }

    pub async fn customers(&self) -> Vec<String> {
        let guard = self.inner.lock().await;
        let mut names: Vec<String> = guard.customers.iter().cloned().collect();
        names.sort();
        names
    }
}

impl Inner {
    #[cfg(test)]
    fn rejects_order(&self, market_order_id: &str) -> bool {
        self.failing_orders.contains(market_order_id)
    }

    #[cfg(not(test))]
    fn rejects_order(&self, _market_order_id: &str) -> bool {
        false
    }

    #[cfg(test)]
    fn reports_existing(&self, market_order_id: &str) -> bool {
        !self.skip_existence_check && self.sales_orders.contains_key(market_order_id)
    }

    #[cfg(not(test))]
    fn reports_existing(&self, market_order_id: &str) -> bool {
        self.sales_orders.contains_key(market_order_id)
    }

    #[cfg(test)]
    fn rejects_shop_name(&self) -> bool {
        self.failing_shop_name
    }

    #[cfg(not(test))]
    fn rejects_shop_name(&self) -> bool {
        false
    }

    #[cfg(test)]
    fn rejects_customer(&self, name: &str) -> bool {
        self.failing_customers && !self.customers.contains(name)
    }

    #[cfg(not(test))]
    fn rejects_customer(&self, _name: &str) -> bool {
        false
    }
}

pub fn parse_mappings(raw: &str) -> Result<Vec<SkuMapping>, StoreError> {
    serde_yaml::from_str(raw).map_err(|err| StoreError::Deserialize(err.to_string()))
}

#[cfg(test)]
impl MemoryStore {
    pub async fn fail_inserts_for(&self, market_order_id: &str) {
        self.inner
            .lock()
            .await
            .failing_orders
            .insert(market_order_id.to_string());
    }

    /// `sales_order_exists` always answers false, as a concurrent writer
    /// racing past the pre-check would see it. Inserts still enforce uniqueness.
    pub async fn skip_existence_check(&self) {
        self.inner.lock().await.skip_existence_check = true;
    }

    pub async fn fail_shop_name_saves(&self) {
        self.inner.lock().await.failing_shop_name = true;
    }

    pub async fn fail_customer_creation(&self) {
        self.inner.lock().await.failing_customers = true;
    }

    pub async fn logs(&self) -> Vec<SyncLogEntry> {
        self.inner.lock().await.logs.clone()
    }
}

#[async_trait]
impl ErpStore for MemoryStore {
    async fn load_settings(&self) -> Result<Settings, StoreError> {
        self.inner
            .lock()
            .await
            .settings
            .clone()
            .ok_or(StoreError::MissingSettings)
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let settings = guard.settings.get_or_insert_with(Settings::default);
        settings.credentials = credentials.clone();
        Ok(())
    }

    async fn save_shop_name(&self, shop_name: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if guard.rejects_shop_name() {
            return Err(StoreError::Request("settings update rejected".into()));
        }
        let settings = guard.settings.get_or_insert_with(Settings::default);
        settings.shop_name = Some(shop_name.to_string());
        Ok(())
    }

    async fn find_mapping(
        &self,
        sku: &str,
        platform: &str,
    ) -> Result<Option<SkuMapping>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .mappings
            .iter()
            .find(|m| m.enabled && m.marketplace_sku == sku && m.marketplace == platform)
            .cloned())
    }

    async fn sales_order_exists(&self, market_order_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.reports_existing(market_order_id))
    }

    async fn find_or_create_customer(&self, name: &str) -> Result<String, StoreError> {
        let mut guard = self.inner.lock().await;
        if guard.rejects_customer(name) {
            return Err(StoreError::Request("customer insert rejected".into()));
        }
        guard.customers.insert(name.to_string());
        Ok(name.to_string())
    }

    async fn insert_sales_order(&self, order: &NewSalesOrder) -> Result<String, StoreError> {
        let mut guard = self.inner.lock().await;
        if guard.rejects_order(&order.market_order_id) {
            return Err(StoreError::Request("insert rejected".into()));
        }
        if guard.sales_orders.contains_key(&order.market_order_id) {
            return Err(StoreError::Conflict(order.market_order_id.clone()));
        }
        guard.next_order += 1;
        let name = format!("{}{:05}", order.naming_series, guard.next_order);
        guard.sales_orders.insert(
            order.market_order_id.clone(),
            SalesOrder {
                name: name.clone(),
                order: order.clone(),
            },
        );
        Ok(name)
    }

    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<(), StoreError> {
        self.inner.lock().await.logs.push(entry.clone());
        Ok(())
    }

    async fn recent_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard.logs.iter().rev().take(limit).cloned().collect())
    }

    async fn prune_sync_logs(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut guard = self.inner.lock().await;
        let before = guard.logs.len();
        guard.logs.retain(|entry| entry.sync_date >= cutoff);
        Ok(before - guard.logs.len())
    }
}
