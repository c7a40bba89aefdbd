use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

/// One mutex per key, alive only while someone holds or waits on it.
/// Callers holding the same key run one at a time; different keys never
/// contend.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Runs `work` while holding the lock for `key`.
    pub(crate) fn run<T>(&self, key: &str, work: impl FnOnce() -> Result<T>) -> Result<T> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| anyhow!("cache lock table poisoned"))?;
            Arc::clone(slots.entry(key.to_string()).or_default())
        };

        let result = match slot.lock() {
            Ok(_guard) => work(),
            Err(_) => Err(anyhow!("cache lock for '{key}' poisoned")),
        };
        self.release(key, slot);
        result
    }

    /// Drops the slot for `key` once no other caller references it.
    fn release(&self, key: &str, slot: Arc<Mutex<()>>) {
        drop(slot);
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        // The table holds the last reference only when nobody else is
        // inside or queued; new callers need this table lock to join.
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or_default()
    }
}
