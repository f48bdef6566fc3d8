use std::sync::Arc;

use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::objectstore::{ObjectStore, StoreError};
use crate::views::StoreType;

/// Immutable object binding `(name, type, access-controller CID)`.
/// Its own CID is the root of the database address; changing any field
/// (notably the access policy) yields a new address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(rename = "type")]
    pub store_type: StoreType,
    #[serde(rename = "accessController")]
    pub access_controller: String,
}

impl Manifest {
    pub fn new(name: impl Into<String>, store_type: StoreType, access_controller: &Cid) -> Self {
        Self {
            name: name.into(),
            store_type,
            access_controller: access_controller.to_string(),
        }
    }

    /// Canonically encode and store, returning the manifest CID.
    pub async fn save(&self, store: &Arc<dyn ObjectStore>) -> Result<Cid, DbError> {
        let bytes = serde_json::to_vec(self).map_err(|e| DbError::Store(e.to_string()))?;
        let cid = store
            .put(bytes)
            .await
            .map_err(|e| DbError::Store(e.to_string()))?;
        store
            .pin(&cid)
            .await
            .map_err(|e| DbError::Store(e.to_string()))?;
        Ok(cid)
    }

    pub async fn load(store: &Arc<dyn ObjectStore>, cid: &Cid) -> Result<Manifest, DbError> {
        let bytes = store.get(cid).await.map_err(|e| match e {
            StoreError::NotFound => DbError::UnknownDatabase(cid.to_string()),
            other => DbError::Store(other.to_string()),
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DbError::Store(format!("bad manifest {cid}: {e}")))
    }

    pub fn access_controller_cid(&self) -> Result<Cid, DbError> {
        self.access_controller
            .parse::<Cid>()
            .map_err(|e| DbError::Store(format!("bad access controller cid: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::{cid_for, inmem::MemoryObjectStore};

    #[tokio::test]
    async fn save_load_round_trip() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let ac = cid_for(b"policy");
        let m = Manifest::new("orders", StoreType::EventLog, &ac);
        let cid = m.save(&store).await.unwrap();
        let back = Manifest::load(&store, &cid).await.unwrap();
        assert_eq!(back, m);
        assert_eq!(back.access_controller_cid().unwrap(), ac);
    }

    #[tokio::test]
    async fn equal_manifests_share_a_cid() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let ac = cid_for(b"policy");
        let a = Manifest::new("orders", StoreType::KeyValue, &ac)
            .save(&store)
            .await
            .unwrap();
        let b = Manifest::new("orders", StoreType::KeyValue, &ac)
            .save(&store)
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn load_rejects_garbage() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let cid = store.put(b"{not a manifest".to_vec()).await.unwrap();
        assert!(Manifest::load(&store, &cid).await.is_err());
    }

    #[tokio::test]
    async fn load_missing_is_unknown_database() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let err = Manifest::load(&store, &cid_for(b"nope")).await.unwrap_err();
        assert!(matches!(err, DbError::UnknownDatabase(_)));
    }
}
