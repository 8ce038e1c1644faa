use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// Marketplace SKU → ERP item, owned by whoever configures the integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuMapping {
    pub marketplace_sku: String,
    pub marketplace: String,
    pub erpnext_item: String,
    #[serde(default)]
    pub conversion_factor: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SalesOrderStatus {
    #[default]
    Draft,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderItem {
    pub item_code: String,
    pub qty: f64,
    pub rate: f64,
    pub warehouse: String,
    pub delivery_date: NaiveDate,
}

/// A sales order ready to be inserted; the store assigns its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSalesOrder {
    pub naming_series: String,
    pub customer: String,
    pub transaction_date: NaiveDate,
    pub order_type: String,
    pub market_order_id: String,
    pub status: SalesOrderStatus,
    pub items: Vec<SalesOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrder {
    pub name: String,
    #[serde(flatten)]
    pub order: NewSalesOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "Success",
            SyncStatus::Partial => "Partial",
            SyncStatus::Failed => "Failed",
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub sync_date: DateTime<Utc>,
    pub platform: String,
    pub status: SyncStatus,
    pub orders_processed: u32,
    pub details: String,
    #[serde(default)]
    pub log_json: Option<Value>,
}

/// What one sync cycle did. Returned to manual callers and job pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub created: u32,
    pub listed: u32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
