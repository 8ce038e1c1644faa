use crate::lock::CycleLock;
use crate::mapper::{OrderMapper, OrderOutcome};
use crate::models::{SyncLogEntry, SyncReport, SyncStatus};
use crate::shopee::config::PLATFORM;
use crate::shopee::{ShopeeClient, ShopeeError, TimeWindow};
use crate::store::{ErpStore, StoreError};
use crate::token::{TokenError, ensure_valid_token};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{error, info, warn};

pub const TOKEN_FAILED_MESSAGE: &str = "Token refresh failed during background sync.";
pub const NO_ORDERS_MESSAGE: &str = "No new 'READY_TO_SHIP' orders found.";
pub const LOCKED_MESSAGE: &str = "Sync already in progress.";

#[derive(Debug, Error)]
enum CycleError {
    #[error("settings unavailable: {0}")]
    Settings(StoreError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Network(#[from] ShopeeError),
}

/// Runs sync cycles: refresh token, list ready orders, fetch details,
/// create sales orders, write one log entry.
#[derive(Clone)]
pub struct SyncService {
    client: ShopeeClient,
    store: Arc<dyn ErpStore>,
    mapper: OrderMapper,
    lock: Option<Arc<dyn CycleLock>>,
}

impl SyncService {
    pub fn new(client: ShopeeClient, store: Arc<dyn ErpStore>, mapper: OrderMapper) -> Self {
        Self {
            client,
            store,
            mapper,
            lock: None,
        }
    }

    pub fn with_lock(mut self, lock: Option<Arc<dyn CycleLock>>) -> Self {
        self.lock = lock;
        self
    }

    pub fn client(&self) -> &ShopeeClient {
        &self.client
    }

    pub fn store(&self) -> &dyn ErpStore {
        self.store.as_ref()
    }

    pub fn mapper(&self) -> &OrderMapper {
        &self.mapper
    }

    pub async fn sync_orders(&self) -> SyncReport {
        self.sync_orders_at(Utc::now()).await
    }

    /// One full cycle. Never fails: every outcome ends up in the returned
    /// report and in exactly one sync log entry.
    pub async fn sync_orders_at(&self, now: DateTime<Utc>) -> SyncReport {
        let started = Instant::now();

        let held = match &self.lock {
            Some(lock) => match lock.try_acquire().await {
                Ok(Some(held)) => Some(held),
                Ok(None) => {
                    let report = failed(LOCKED_MESSAGE.to_string());
                    self.record(&report, None, now).await;
                    return report;
                }
                Err(err) => {
                    warn!(target = "marketsync.sync", error = %err, "sync_lock_unavailable; continuing unlocked");
                    None
                }
            },
            None => None,
        };

        let (report, raw) = match self.run_cycle(now).await {
            Ok(outcome) => outcome,
            Err(CycleError::Token(err)) => {
                error!(target = "marketsync.sync", error = %err, "sync aborted: token");
                (failed(TOKEN_FAILED_MESSAGE.to_string()), None)
            }
            Err(err) => {
                error!(target = "marketsync.sync", error = %err, "sync aborted");
                (failed(format!("Critical Error: {err}")), None)
            }
        };

        if let (Some(lock), Some(token)) = (&self.lock, held) {
            lock.release(token).await;
        }

        self.record(&report, raw, now).await;
        crate::metrics::sync_cycle(
            report.status.as_str(),
            report.created,
            started.elapsed().as_millis(),
        );
        info!(
            target = "marketsync.sync",
            status = report.status.as_str(),
            created = report.created,
            listed = report.listed,
            "sync cycle finished"
        );
        report
    }

    async fn run_cycle(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(SyncReport, Option<Value>), CycleError> {
        let timestamp = now.timestamp();
        let settings = self
            .store
            .load_settings()
            .await
            .map_err(CycleError::Settings)?;
        let credentials = ensure_valid_token(
            &self.client,
            self.store.as_ref(),
            settings.credentials,
            timestamp,
        )
        .await?;

        let list = self
            .client
            .list_ready_orders(&credentials, TimeWindow::trailing_day(timestamp), timestamp)
            .await?;
        if list.orders.is_empty() {
            let report = SyncReport {
                status: SyncStatus::Success,
                created: 0,
                listed: 0,
                message: NO_ORDERS_MESSAGE.to_string(),
            };
            return Ok((report, None));
        }

        let order_ids = list.order_ids();
        let details = self
            .client
            .get_order_details(&credentials, &order_ids, timestamp)
            .await?;

        let today = now.date_naive();
        let warehouse = settings.default_warehouse.as_deref();
        let mut created = 0u32;
        for order in &details {
            match self
                .mapper
                .create_sales_order(self.store.as_ref(), order, PLATFORM, warehouse, today)
                .await
            {
                Ok(OrderOutcome::Created { .. }) => created += 1,
                Ok(outcome) => {
                    info!(target = "marketsync.sync", order_sn = %order.order_sn, ?outcome, "order not created");
                }
                Err(err) => {
                    error!(target = "marketsync.sync", error = %err, "sales order creation failed");
                }
            }
        }

        let listed = order_ids.len() as u32;
        let status = if created == listed {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        };
        let report = SyncReport {
            status,
            created,
            listed,
            message: format!("Successfully created {created} out of {listed} orders."),
        };
        Ok((report, Some(list.raw)))
    }

    async fn record(&self, report: &SyncReport, raw: Option<Value>, now: DateTime<Utc>) {
        let entry = SyncLogEntry {
            sync_date: now,
            platform: PLATFORM.to_string(),
            status: report.status,
            orders_processed: report.created,
            details: report.message.clone(),
            log_json: raw,
        };
        if let Err(err) = self.store.append_sync_log(&entry).await {
            error!(target = "marketsync.sync", error = %err, "sync log creation failed");
        }
    }
}

fn failed(message: String) -> SyncReport {
    SyncReport {
        status: SyncStatus::Failed,
        created: 0,
        listed: 0,
        message,
    }
}
