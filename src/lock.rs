use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend unavailable: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Proof of ownership handed back to [`CycleLock::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

/// Mutual exclusion for sync cycles across processes.
#[async_trait]
pub trait CycleLock: Send + Sync {
    /// `Ok(None)` when someone else holds the lock.
    async fn try_acquire(&self) -> Result<Option<LockToken>, LockError>;

    /// Only releases if `token` still owns the lock. Errors are logged.
    async fn release(&self, token: LockToken);
}

/// Redis-backed [`CycleLock`] so two replicas never run a cycle at once.
#[derive(Clone)]
pub struct SyncLock {
    client: redis::Client,
    key: String,
    ttl_secs: u64,
}

impl SyncLock {
    pub fn new(client: redis::Client, key: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            client,
            key: key.into(),
            ttl_secs,
        }
    }

    pub fn from_env() -> Option<Self> {
        let client = std::env::var("REDIS_URL")
            .ok()
            .and_then(|u| redis::Client::open(u).ok())?;
        let ttl_secs = std::env::var("SYNC_LOCK_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(600);
        Some(Self::new(client, "marketsync:sync_lock", ttl_secs))
    }
}

#[async_trait]
impl CycleLock for SyncLock {
    async fn try_acquire(&self) -> Result<Option<LockToken>, LockError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let token = Uuid::new_v4().to_string();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.map(|_| LockToken(token)))
    }

    async fn release(&self, token: LockToken) {
        let result: Result<i32, redis::RedisError> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            redis::Script::new(RELEASE_SCRIPT)
                .key(&self.key)
                .arg(&token.0)
                .invoke_async(&mut conn)
                .await
        }
        .await;
        if let Err(err) = result {
            warn!(target = "marketsync.lock", error = %err, "sync_lock_release_failed");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_redis_is_a_backend_error() {
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        let lock = SyncLock::new(client, "marketsync:test", 5);
        let err = lock.try_acquire().await.unwrap_err();
        assert!(matches!(err, LockError::Backend(_)));
        // release against a dead backend only logs
        lock.release(LockToken("nobody".into())).await;
    }
}
