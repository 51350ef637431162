use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use moka::future::Cache;
use tokio::sync::Mutex;

use crate::claims::ClaimOrchestrator;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::store::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub claims: Arc<ClaimOrchestrator>,
    pub clock: Arc<dyn Clock>,
    pub storage_timeout: Duration,
    pub secure_cookies: bool,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        storage: Storage,
        claims: Arc<ClaimOrchestrator>,
        clock: Arc<dyn Clock>,
        storage_timeout: Duration,
        secure_cookies: bool,
    ) -> Self {
        assert!(
            storage_timeout >= Duration::from_millis(100),
            "Storage timeout below 100ms is unsafe"
        );
        Self {
            storage,
            claims,
            clock,
            storage_timeout,
            secure_cookies,
            start_time: Instant::now(),
        }
    }
}

pub struct ApiCache {
    /// User ids already persisted; lets repeat claimants skip the upsert.
    pub known_users: Cache<String, ()>,
    /// One async lock per user id so a browser firing parallel claims is
    /// checked against its own latest claim one request at a time.
    pub claim_locks: ClaimLocks,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.users_max_capacity >= 100,
            "User cache capacity threshold"
        );

        let known_users = Cache::builder()
            .max_capacity(config.users_max_capacity)
            .time_to_live(Duration::from_secs(config.users_ttl_seconds))
            .time_to_idle(Duration::from_secs(config.users_ttl_seconds / 2 + 1))
            .build();

        Self {
            known_users,
            claim_locks: ClaimLocks::default(),
        }
    }

    pub fn claim_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.claim_locks.lock_for(user_id)
    }
}

const MIN_PRUNE_AT: usize = 1_024;

/// Per-user claim locks.
///
/// The table only keeps weak references: an entry stays valid exactly as long
/// as some request holds its `Arc`, and dead entries are swept once the table
/// doubles in size.
#[derive(Debug, Default)]
pub struct ClaimLocks {
    table: parking_lot::Mutex<LockTable>,
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<String, Weak<Mutex<()>>>,
    prune_at: usize,
}

impl ClaimLocks {
    pub fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.table.lock();
        if let Some(lock) = table.locks.get(user_id).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(Mutex::new(()));
        table
            .locks
            .insert(user_id.to_string(), Arc::downgrade(&lock));
        if table.locks.len() >= table.prune_at.max(MIN_PRUNE_AT) {
            table.locks.retain(|_, weak| weak.strong_count() > 0);
            table.prune_at = table.locks.len() * 2;
        }
        lock
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().locks.len()
    }
}
