use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-key async mutex registry.
///
/// Serializes read-modify-write sequences on one order (or one user's
/// checkout) inside this process. Row locks taken in the database
/// transaction cover other processes; this also covers SQLite, which has no
/// `SELECT ... FOR UPDATE`.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    entries: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Held lock for one key. The registry entry is evicted on drop once nobody
/// else holds or waits on it.
pub struct KeyedGuard {
    key: Uuid,
    entries: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: Uuid) -> KeyedGuard {
        let mutex = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key,
            entries: self.entries.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.entries
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
