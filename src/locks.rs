//! Per-key async locks.
//!
//! The engine needs mutual exclusion per document and per index name, never
//! across keys. [`KeyedLocks`] hands out one `tokio::sync::Mutex` per key;
//! the outer map lock is held only while looking the key up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_excludes_other_key_does_not() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("doc:a").await;
        // A different key is immediately available.
        let _b = locks.lock("doc:b").await;
        // The same key is not.
        let again = tokio::time::timeout(std::time::Duration::from_millis(20), locks.lock("doc:a")).await;
        assert!(again.is_err());
    }
}
