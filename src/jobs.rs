use crate::{
    models::{ApiError, SyncReport},
    sync::SyncService,
};
use chrono::Utc;
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{info, warn};
use uuid::Uuid;

const JOB_HISTORY: usize = 256;

/// Single consumer for sync cycles. Scheduled ticks and manual triggers share
/// the queue, so cycles inside one process never overlap.
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::Sender<Job>,
    jobs: Arc<Mutex<JobBook>>,
}

#[derive(Clone, Copy)]
struct Job {
    id: Uuid,
    trigger: Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { report: SyncReport },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub trigger: Trigger,
    #[serde(flatten)]
    pub state: JobState,
}

#[derive(Default)]
struct JobBook {
    states: HashMap<Uuid, (Trigger, JobState)>,
    order: VecDeque<Uuid>,
}

impl JobBook {
    fn insert(&mut self, id: Uuid, trigger: Trigger, state: JobState) {
        if self.states.insert(id, (trigger, state)).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > JOB_HISTORY {
            if let Some(oldest) = self.order.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub log_retention_days: i64,
}

impl ScheduleConfig {
    pub fn from_env() -> Self {
        let interval = std::env::var("SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(15 * 60);
        let log_retention_days = std::env::var("LOG_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30);
        Self {
            interval: Duration::from_secs(interval),
            log_retention_days,
        }
    }
}

impl SyncQueue {
    pub fn spawn(service: SyncService, config: ScheduleConfig) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let jobs = Arc::new(Mutex::new(JobBook::default()));
        let jobs_bg = jobs.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                jobs_bg
                    .lock()
                    .await
                    .insert(job.id, job.trigger, JobState::Running);

                let report = service.sync_orders().await;

                if job.trigger == Trigger::Scheduled {
                    let cutoff = Utc::now() - chrono::Duration::days(config.log_retention_days);
                    match service.store().prune_sync_logs(cutoff).await {
                        Ok(0) => {}
                        Ok(removed) => {
                            info!(target = "marketsync.jobs", removed, "old sync logs pruned")
                        }
                        Err(err) => {
                            warn!(target = "marketsync.jobs", error = %err, "sync_log_prune_failed")
                        }
                    }
                }

                jobs_bg
                    .lock()
                    .await
                    .insert(job.id, job.trigger, JobState::Completed { report });
            }
        });

        (Self { tx, jobs }, handle)
    }

    pub async fn enqueue(&self, trigger: Trigger) -> Result<Uuid, ApiError> {
        let permit = self.tx.reserve().await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        let id = Uuid::new_v4();
        // Queued must land before the worker can mark the job Running.
        self.jobs.lock().await.insert(id, trigger, JobState::Queued);
        permit.send(Job { id, trigger });
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.jobs.lock().await;
        guard.states.get(&id).cloned().map(|(trigger, state)| JobInfo {
            id: id.to_string(),
            trigger,
            state,
        })
    }

    /// Enqueues a scheduled cycle every `config.interval`, starting one
    /// interval from now.
    pub fn spawn_scheduler(&self, config: ScheduleConfig) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = queue.enqueue(Trigger::Scheduled).await {
                    warn!(target = "marketsync.jobs", error = %err.error, "scheduled sync not enqueued");
                    break;
                }
            }
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(16)
}
