use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<Mutex<()>>>;

/// In-process keyed async locks. Reaction mutations on the same chat message
/// (`workspace/channel/ts`) run one at a time; different messages never wait
/// on each other. Entries are dropped once nobody holds or awaits them.
#[derive(Clone, Default)]
pub struct MessageLocks {
    inner: Arc<StdMutex<LockMap>>,
}

pub struct MessageGuard {
    key: String,
    locks: MessageLocks,
    _guard: OwnedMutexGuard<()>,
}

impl MessageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> MessageGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(key.to_owned()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        MessageGuard { key: key.to_owned(), locks: self.clone(), _guard: guard }
    }

    /// Acquires every key in sorted order so overlapping callers cannot deadlock.
    pub async fn acquire_all(&self, keys: impl IntoIterator<Item = String>) -> Vec<MessageGuard> {
        let keys: BTreeSet<String> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.acquire(key).await);
        }
        guards
    }

    pub fn held_keys(&self) -> usize {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

impl Drop for MessageGuard {
    fn drop(&mut self) {
        let mut map = self.locks.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map plus the one inside this guard: nobody else is waiting.
        let idle = map.get(&self.key).map(|lock| Arc::strong_count(lock) <= 2).unwrap_or(false);
        if idle {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::MessageLocks;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = MessageLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let overlap = overlap.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("T1/C1/1.0").await;
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert_eq!(locks.held_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let locks = MessageLocks::new();
        let _first = locks.acquire("T1/C1/1.0").await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire("T1/C1/2.0")).await;

        assert!(second.is_ok());
        assert_eq!(locks.held_keys(), 2);
    }

    #[tokio::test]
    async fn overlapping_key_sets_in_opposite_order_both_complete() {
        let locks = MessageLocks::new();
        let forward = vec!["T1/C1/1.0".to_owned(), "T2/C9/2.0".to_owned()];
        let backward: Vec<String> = forward.iter().rev().cloned().collect();

        let mut handles = Vec::new();
        for keys in [forward, backward].into_iter().cycle().take(8) {
            let locks = locks.clone();
            handles.push(tokio::spawn(async move {
                let guards = locks.acquire_all(keys).await;
                tokio::time::sleep(Duration::from_millis(1)).await;
                guards.len()
            }));
        }
        for handle in handles {
            let held = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("no deadlock")
                .expect("task");
            assert_eq!(held, 2);
        }

        assert_eq!(locks.held_keys(), 0);
    }

    #[tokio::test]
    async fn duplicate_keys_are_acquired_once() {
        let locks = MessageLocks::new();
        let guards = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire_all(vec!["T1/C1/1.0".to_owned(), "T1/C1/1.0".to_owned()]),
        )
        .await
        .expect("a repeated key must not wait on itself");

        assert_eq!(guards.len(), 1);
    }
}
