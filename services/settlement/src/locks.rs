//! Per-entity advisory locks
//!
//! Serializes settlement work per order and per asset lot while unrelated
//! entities proceed fully in parallel. Multi-entity acquisition always
//! happens in ascending id order regardless of buy/sell role, so lock-order
//! inversion deadlocks cannot occur.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Table of advisory locks keyed by entity uuid.
#[derive(Default)]
pub struct EntityLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one entity.
    pub async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let entry = self
                .locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())));
            entry.value().clone()
        };
        lock.lock_owned().await
    }

    /// Acquire locks for several entities in ascending id order.
    pub async fn acquire_all(&self, mut ids: Vec<Uuid>) -> Vec<OwnedMutexGuard<()>> {
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.acquire(id).await);
        }
        guards
    }
}
