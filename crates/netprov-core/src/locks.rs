//! Per-router mutual exclusion
//!
//! Two requests against the same router can otherwise interleave their
//! upsert/remove calls. Holding one lock per router id for the length of a
//! pass keeps them apart inside this process; other processes are not
//! covered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Lazily created async lock per router id
#[derive(Debug, Default)]
pub struct RouterLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl RouterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `router_id`
    pub async fn acquire(&self, router_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(router_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Acquire only when `enabled`
    pub async fn acquire_if(&self, enabled: bool, router_id: i64) -> Option<OwnedMutexGuard<()>> {
        if enabled {
            Some(self.acquire(router_id).await)
        } else {
            None
        }
    }
}
