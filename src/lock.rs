use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One execution lock per listener. Holding the guard means the listener's
/// playbooks may run; other triggers of the same listener wait in FIFO order.
#[derive(Clone, Default)]
pub struct ListenerLocks {
    /// lazily created on first trigger
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ListenerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other run of `listener` is active.
    pub async fn acquire(&self, listener: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(listener.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Returns `true` if a run of `listener` currently holds its lock.
    pub async fn is_busy(&self, listener: &str) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(listener)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
