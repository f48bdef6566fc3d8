use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use cid::Cid;

use super::{cid_for, ObjectStore, StoreError};

/// In-process object store. One instance is shared (via `Arc`) by every
/// coordinator that should see the same objects, the way peers share a
/// content-addressed network in production.
#[derive(Default)]
pub struct MemoryObjectStore {
    blobs: RwLock<HashMap<Cid, Vec<u8>>>,
    pins: RwLock<HashSet<Cid>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pinned(&self, cid: &Cid) -> bool {
        self.pins.read().unwrap().contains(cid)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<Cid, StoreError> {
        let cid = cid_for(&bytes);
        self.blobs.write().unwrap().insert(cid, bytes);
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .read()
            .unwrap()
            .get(cid)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn pin(&self, cid: &Cid) -> Result<(), StoreError> {
        if !self.blobs.read().unwrap().contains_key(cid) {
            return Err(StoreError::NotFound);
        }
        self.pins.write().unwrap().insert(*cid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_deterministic_and_deduplicated() {
        let store = MemoryObjectStore::new();
        let a = store.put(b"same bytes".to_vec()).await.unwrap();
        let b = store.put(b"same bytes".to_vec()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a).await.unwrap(), b"same bytes");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryObjectStore::new();
        let cid = cid_for(b"never stored");
        assert_eq!(store.get(&cid).await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn pin_requires_presence() {
        let store = MemoryObjectStore::new();
        let cid = store.put(b"blob".to_vec()).await.unwrap();
        store.pin(&cid).await.unwrap();
        assert!(store.is_pinned(&cid));

        let missing = cid_for(b"missing");
        assert_eq!(store.pin(&missing).await.unwrap_err(), StoreError::NotFound);
    }
}
