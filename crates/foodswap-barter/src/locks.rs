use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{BarterError, Result};

/// One async mutex per key, created on demand and dropped with its last guard.
#[derive(Debug)]
pub(crate) struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Weak<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn lock(&self, key: &K) -> Result<OwnedMutexGuard<()>> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| BarterError::LockPoisoned)?;
            slots.retain(|_, weak| weak.strong_count() > 0);
            match slots.get(key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(key.clone(), Arc::downgrade(&slot));
                    slot
                }
            }
        };
        Ok(slot.lock_owned().await)
    }

    #[cfg(test)]
    fn live_keys(&self) -> usize {
        self.slots
            .lock()
            .map(|s| s.values().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}
