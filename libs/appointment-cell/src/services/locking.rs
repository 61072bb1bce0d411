use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::AppointmentError;

/// Proof of holding a lock. The token lets a backend refuse releases from a
/// holder whose lease already expired and was taken over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLease {
    pub key: String,
    pub token: String,
}

pub fn slot_key(slot_id: Uuid) -> String {
    format!("slot:{}", slot_id)
}

pub fn waiting_key(entry_id: Uuid) -> String {
    format!("waiting:{}", entry_id)
}

#[async_trait]
pub trait SlotLocker: Send + Sync {
    /// `Ok(None)` means someone else holds the key.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<SlotLease>, AppointmentError>;

    async fn release(&self, lease: &SlotLease) -> Result<(), AppointmentError>;
}

/// Locks for a single API instance.
#[derive(Default)]
pub struct InMemorySlotLocker {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemorySlotLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotLocker for InMemorySlotLocker {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<SlotLease>, AppointmentError> {
        let mut held = self.held.lock().await;
        let now = Instant::now();

        if let Some((_, expires_at)) = held.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
            debug!("Taking over expired lease on {}", key);
        }

        let token = Uuid::new_v4().to_string();
        held.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(SlotLease { key: key.to_string(), token }))
    }

    async fn release(&self, lease: &SlotLease) -> Result<(), AppointmentError> {
        let mut held = self.held.lock().await;
        if held.get(&lease.key).is_some_and(|(token, _)| *token == lease.token) {
            held.remove(&lease.key);
        }
        Ok(())
    }
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Locks shared by every API instance pointed at the same Redis.
pub struct RedisSlotLocker {
    pool: Pool,
}

impl RedisSlotLocker {
    pub async fn connect(redis_url: &str) -> Result<Self, AppointmentError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| AppointmentError::LockBackend(format!("Failed to create Redis pool: {}", e)))?;

        let mut conn = pool.get().await
            .map_err(|e| AppointmentError::LockBackend(format!("Failed to connect to Redis: {}", e)))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await
            .map_err(|e| AppointmentError::LockBackend(e.to_string()))?;

        info!("Redis slot locker initialized");
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, AppointmentError> {
        self.pool.get().await
            .map_err(|e| AppointmentError::LockBackend(format!("Redis pool exhausted: {}", e)))
    }
}

#[async_trait]
impl SlotLocker for RedisSlotLocker {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<SlotLease>, AppointmentError> {
        let mut conn = self.connection().await?;
        let token = Uuid::new_v4().to_string();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppointmentError::LockBackend(e.to_string()))?;

        Ok(reply.map(|_| SlotLease { key: key.to_string(), token }))
    }

    async fn release(&self, lease: &SlotLease) -> Result<(), AppointmentError> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppointmentError::LockBackend(e.to_string()))?;

        if removed == 0 {
            warn!("Lease on {} expired before release", lease.key);
        }
        Ok(())
    }
}

/// Acquisition policy on top of a `SlotLocker`: ordered multi-key
/// acquisition, linear backoff, all-or-nothing.
#[derive(Clone)]
pub struct SlotLockManager {
    locker: Arc<dyn SlotLocker>,
    ttl: Duration,
    max_attempts: u32,
}

impl SlotLockManager {
    pub fn new(locker: Arc<dyn SlotLocker>, ttl: Duration, max_attempts: u32) -> Self {
        Self {
            locker,
            ttl,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Keys are sorted and de-duplicated first so two operations locking the
    /// same pair of slots cannot deadlock each other.
    pub async fn acquire_all(&self, mut keys: Vec<String>) -> Result<Vec<SlotLease>, AppointmentError> {
        keys.sort();
        keys.dedup();

        let mut leases = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.acquire_one(key).await {
                Ok(lease) => leases.push(lease),
                Err(e) => {
                    self.release_all(leases).await;
                    return Err(e);
                }
            }
        }

        Ok(leases)
    }

    pub async fn release_all(&self, leases: Vec<SlotLease>) {
        for lease in leases.iter().rev() {
            if let Err(e) = self.locker.release(lease).await {
                // The lease expires on its own.
                warn!("Failed to release {}: {}", lease.key, e);
            }
        }
    }

    async fn acquire_one(&self, key: &str) -> Result<SlotLease, AppointmentError> {
        for attempt in 1..=self.max_attempts {
            if let Some(lease) = self.locker.try_acquire(key, self.ttl).await? {
                debug!("Acquired {} on attempt {}", key, attempt);
                return Ok(lease);
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
            }
        }

        warn!("Gave up on {} after {} attempts", key, self.max_attempts);
        Err(AppointmentError::SlotBusy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn manager(locker: Arc<InMemorySlotLocker>, attempts: u32) -> SlotLockManager {
        SlotLockManager::new(locker, Duration::from_secs(30), attempts)
    }

    #[tokio::test]
    async fn second_holder_is_refused_until_release() {
        let locker = InMemorySlotLocker::new();
        let ttl = Duration::from_secs(30);

        let lease = locker.try_acquire("slot:a", ttl).await.unwrap().unwrap();
        assert!(locker.try_acquire("slot:a", ttl).await.unwrap().is_none());

        locker.release(&lease).await.unwrap();
        assert!(locker.try_acquire("slot:a", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over_and_stale_release_is_ignored() {
        let locker = InMemorySlotLocker::new();

        let stale = locker.try_acquire("slot:b", Duration::from_millis(10)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fresh = locker.try_acquire("slot:b", Duration::from_secs(30)).await.unwrap().unwrap();
        assert_ne!(stale.token, fresh.token);

        locker.release(&stale).await.unwrap();
        assert!(locker.try_acquire("slot:b", Duration::from_secs(30)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acquire_all_is_all_or_nothing() {
        let locker = Arc::new(InMemorySlotLocker::new());
        let blocker = locker.try_acquire("slot:z", Duration::from_secs(30)).await.unwrap().unwrap();

        let result = manager(locker.clone(), 2)
            .acquire_all(vec!["slot:z".to_string(), "slot:a".to_string()])
            .await;
        assert_matches!(result, Err(AppointmentError::SlotBusy));

        // slot:a was acquired first (sorted order) and must have been let go.
        assert!(locker.try_acquire("slot:a", Duration::from_secs(30)).await.unwrap().is_some());
        locker.release(&blocker).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_keys_are_locked_once() {
        let locker = Arc::new(InMemorySlotLocker::new());
        let leases = manager(locker.clone(), 1)
            .acquire_all(vec!["slot:c".to_string(), "slot:c".to_string()])
            .await
            .unwrap();
        assert_eq!(leases.len(), 1);
    }

    #[tokio::test]
    async fn contention_is_serialized() {
        let locker = Arc::new(InMemorySlotLocker::new());
        let locks = SlotLockManager::new(locker, Duration::from_secs(30), 20);
        let counter = Arc::new(Mutex::new(Vec::new()));

        let tasks: Vec<_> = (0..4).map(|i| {
            let locks = locks.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let leases = locks.acquire_all(vec!["slot:d".to_string()]).await.unwrap();
                counter.lock().await.push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
                locks.release_all(leases).await;
            })
        }).collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(counter.lock().await.len(), 4);
    }
}
