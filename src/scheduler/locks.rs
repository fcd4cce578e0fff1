use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async lock registry.
///
/// Serializes clustering runs per destination and workflow transitions per
/// group: holders of the same key are totally ordered, different keys run in
/// parallel. Locks are created on first use and kept for the process
/// lifetime; the key space (destinations plus live groups) is small.
#[derive(Clone, Default)]
pub struct LockRegistry {
    inner: Arc<parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: impl Into<String>) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock();
            map.entry(key.into())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub fn group_key(id: uuid::Uuid) -> String {
    format!("group:{id}")
}

pub fn destination_key(id: uuid::Uuid) -> String {
    format!("dest:{id}")
}
