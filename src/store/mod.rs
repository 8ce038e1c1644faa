//! Persistence seam for the ERP side: settings, SKU mappings, customers,
//! sales orders and sync logs.

pub mod memory;
pub mod supabase;

use crate::credentials::{Credentials, Settings};
use crate::models::{NewSalesOrder, SkuMapping, SyncLogEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A sales order for this marketplace order id already exists.
    #[error("sales order for `{0}` already exists")]
    Conflict(String),
    #[error("settings record not found")]
    MissingSettings,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[async_trait]
pub trait ErpStore: Send + Sync {
    async fn load_settings(&self) -> Result<Settings, StoreError>;

    async fn save_credentials(&self, credentials: &Credentials) -> Result<(), StoreError>;

    async fn save_shop_name(&self, shop_name: &str) -> Result<(), StoreError>;

    /// Enabled mapping for `(sku, platform)`, if any.
    async fn find_mapping(
        &self,
        sku: &str,
        platform: &str,
    ) -> Result<Option<SkuMapping>, StoreError>;

    async fn sales_order_exists(&self, market_order_id: &str) -> Result<bool, StoreError>;

    /// Returns the customer's name, creating the record when missing.
    async fn find_or_create_customer(&self, name: &str) -> Result<String, StoreError>;

    /// Inserts and returns the generated name. Must fail with
    /// [`StoreError::Conflict`] when `market_order_id` is already taken.
    async fn insert_sales_order(&self, order: &NewSalesOrder) -> Result<String, StoreError>;

    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<(), StoreError>;

    /// Newest first.
    async fn recent_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>, StoreError>;

    /// Deletes entries dated before `cutoff`; returns how many were removed.
    async fn prune_sync_logs(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
