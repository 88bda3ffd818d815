use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-guild advisory locks serializing playlist mutations.
#[derive(Debug, Clone, Default)]
pub struct ScopeLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, scope_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .entry(scope_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Take the lock if it is free. Scheduled cycles skip busy scopes.
    pub fn try_acquire(&self, scope_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(scope_id).try_lock_owned().ok()
    }

    /// Wait for the lock.
    pub async fn acquire(&self, scope_id: &str) -> OwnedMutexGuard<()> {
        self.lock_for(scope_id).lock_owned().await
    }
}
