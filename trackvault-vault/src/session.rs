//! In-memory cache of unwrapped data keys with an idle timeout.
//!
//! Entries slide: every successful `get` refreshes `last_access`. An entry
//! idle for at least the timeout is treated as absent and evicted on
//! contact, and the background sweeper evicts the rest.

use crate::config::VaultConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use trackvault_crypto::DataKey;
use trackvault_storage::UserId;

/// Floor for the sweeper period. `tokio::time::interval` panics on zero.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct CachedKey {
    key: DataKey,
    last_access: Instant,
}

/// Process-local map from user to live data key.
pub struct SessionKeyCache {
    entries: Mutex<HashMap<UserId, CachedKey>>,
    idle_timeout: Duration,
}

impl SessionKeyCache {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn from_config(config: &VaultConfig) -> Self {
        Self::new(config.idle_timeout())
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Stores `key` for `user`, replacing any previous entry.
    pub fn put(&self, user: UserId, key: DataKey) {
        let entry = CachedKey {
            key,
            last_access: Instant::now(),
        };
        self.entries.lock().insert(user, entry);
    }

    /// Returns the live key and refreshes its idle timer.
    pub fn get(&self, user: &UserId) -> Option<DataKey> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(user)?;
        if now.duration_since(entry.last_access) >= self.idle_timeout {
            entries.remove(user);
            debug!("session key for {user} expired on access");
            return None;
        }
        entry.last_access = now;
        Some(entry.key.clone())
    }

    /// Evicts the entry for `user`. Returns whether one was present.
    pub fn remove(&self, user: &UserId) -> bool {
        self.entries.lock().remove(user).is_some()
    }

    /// Evicts every expired entry and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let timeout = self.idle_timeout;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.last_access) < timeout);
        before - entries.len()
    }

    /// Number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every cached key.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Spawns a task that calls [`sweep`](Self::sweep) every `interval`.
    ///
    /// Intervals shorter than [`MIN_SWEEP_INTERVAL`] are raised to it. The
    /// task holds only a weak reference and exits once the cache is
    /// dropped. Must be called from within a tokio runtime.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let cache = Arc::downgrade(self);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_sweeper(cache, interval, shutdown_rx));
        SweeperHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

async fn run_sweeper(
    cache: Weak<SessionKeyCache>,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else {
                    debug!("session cache dropped, sweeper exiting");
                    break;
                };
                let evicted = cache.sweep();
                if evicted > 0 {
                    info!("evicted {evicted} idle session keys");
                }
            }
            _ = &mut shutdown_rx => {
                debug!("session sweeper stopping");
                break;
            }
        }
    }
}

/// Owner of the background sweeper task. Dropping it aborts the task.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackvault_crypto::generate_data_key;

    const TIMEOUT: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn get_returns_same_key() {
        let cache = SessionKeyCache::new(TIMEOUT);
        let user = UserId::new();
        let key = generate_data_key();
        cache.put(user, key.clone());

        let got = cache.get(&user).unwrap();
        assert_eq!(got.as_bytes(), key.as_bytes());
        assert!(cache.get(&UserId::new()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_exactly_at_timeout() {
        let cache = SessionKeyCache::new(TIMEOUT);
        let user = UserId::new();
        cache.put(user, generate_data_key());

        tokio::time::advance(TIMEOUT - Duration::from_millis(1)).await;
        assert!(cache.get(&user).is_some());

        tokio::time::advance(TIMEOUT).await;
        assert!(cache.get(&user).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn access_slides_the_window() {
        let cache = SessionKeyCache::new(TIMEOUT);
        let user = UserId::new();
        cache.put(user, generate_data_key());

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(45)).await;
            assert!(cache.get(&user).is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_and_resets_timer() {
        let cache = SessionKeyCache::new(TIMEOUT);
        let user = UserId::new();
        cache.put(user, generate_data_key());

        tokio::time::advance(Duration::from_secs(50)).await;
        let fresh = generate_data_key();
        cache.put(user, fresh.clone());
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(cache.get(&user).unwrap().as_bytes(), fresh.as_bytes());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_counts_only_expired() {
        let cache = SessionKeyCache::new(TIMEOUT);
        let stale = UserId::new();
        let live = UserId::new();
        cache.put(stale, generate_data_key());
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.put(live, generate_data_key());
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&live).is_some());
        assert_eq!(cache.sweep(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_reports_presence() {
        let cache = SessionKeyCache::new(TIMEOUT);
        let user = UserId::new();
        cache.put(user, generate_data_key());
        assert!(cache.remove(&user));
        assert!(!cache.remove(&user));
    }
}
