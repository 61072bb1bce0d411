use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use shared_config::AppConfig;

use crate::services::events::ScheduleEventHub;
use crate::services::locking::{InMemorySlotLocker, RedisSlotLocker, SlotLockManager, SlotLocker};

/// Router state shared by the scheduling surfaces (appointments, board,
/// video). Services are still built per request from `config`; the locks
/// and the event hub are process-wide.
#[derive(Clone)]
pub struct SchedulingState {
    pub config: Arc<AppConfig>,
    pub locks: SlotLockManager,
    pub events: ScheduleEventHub,
}

impl SchedulingState {
    pub fn new(config: Arc<AppConfig>, locker: Arc<dyn SlotLocker>) -> Self {
        let locks = SlotLockManager::new(
            locker,
            Duration::from_secs(config.slot_lock_ttl_seconds),
            config.slot_lock_max_attempts,
        );
        Self {
            config,
            locks,
            events: ScheduleEventHub::default(),
        }
    }

    pub fn in_memory(config: Arc<AppConfig>) -> Self {
        Self::new(config, Arc::new(InMemorySlotLocker::new()))
    }

    /// Redis locks when `REDIS_URL` is set and reachable, otherwise
    /// in-process locks.
    pub async fn from_config(config: Arc<AppConfig>) -> Self {
        let Some(redis_url) = config.redis_url.clone() else {
            info!("REDIS_URL not set, using in-process slot locks (single instance only)");
            return Self::in_memory(config);
        };

        match RedisSlotLocker::connect(&redis_url).await {
            Ok(locker) => Self::new(config, Arc::new(locker)),
            Err(e) => {
                warn!("Redis slot locker unavailable ({}), falling back to in-process locks", e);
                Self::in_memory(config)
            }
        }
    }
}
