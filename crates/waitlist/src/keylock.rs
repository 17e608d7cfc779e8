//! Per-key async locks.
//!
//! Work on one grouping key runs one task at a time; different keys run in
//! parallel. Holding a [`KeyGuard`] is the proof of serialization that the
//! queue, offer and cascade components ask for.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A lazily-populated map of one mutex per key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

/// Exclusive hold on one key, released on drop.
#[derive(Debug)]
pub struct KeyGuard<K> {
    key: K,
    _guard: OwnedMutexGuard<()>,
}

impl<K> KeyGuard<K> {
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        KeyGuard {
            key,
            _guard: mutex.lock_owned().await,
        }
    }

    /// Drop locks nobody holds or waits on. Returns how many were removed.
    pub async fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(locks.len())
    }

    pub async fn key_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let guard = locks.lock("a".into()).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.lock("a".into()).await.key().clone() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let key = contender.await;
        assert_eq!(key.ok().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::<String>::new();
        let _a = locks.lock("a".into()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b".into())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = KeyedLocks::<String>::new();
        let held = locks.lock("a".into()).await;
        drop(locks.lock("b".into()).await);

        assert_eq!(locks.prune_idle().await, 1);
        assert_eq!(locks.key_count().await, 1);
        drop(held);
        assert_eq!(locks.prune_idle().await, 1);
    }
}
