use std::collections::BTreeSet;
use std::sync::Arc;

use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::error::DbError;
use crate::objectstore::{ObjectStore, StoreError};

/// Wildcard write key: anyone may append.
pub const WILDCARD: &str = "*";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    Write,
}

/// Canonical JSON form. Key sets are kept sorted so equal policies
/// serialize to equal bytes and therefore equal CIDs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Policy {
    admin: BTreeSet<String>,
    write: BTreeSet<String>,
}

/// Per-database append policy, stored as an immutable object and referenced
/// by the manifest. The admin set is carried but not consulted for append
/// authorization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessController {
    policy: Policy,
}

impl AccessController {
    pub fn new() -> Self {
        Self {
            policy: Policy {
                admin: BTreeSet::new(),
                write: BTreeSet::new(),
            },
        }
    }

    pub fn add(&mut self, role: Role, key: impl Into<String>) {
        let set = match role {
            Role::Admin => &mut self.policy.admin,
            Role::Write => &mut self.policy.write,
        };
        set.insert(key.into());
    }

    pub fn write_keys(&self) -> impl Iterator<Item = &str> {
        self.policy.write.iter().map(|s| s.as_str())
    }

    /// An entry is appendable iff its identity is in the write set, or the
    /// write set contains the wildcard.
    pub fn can_append(&self, entry: &Entry) -> bool {
        self.policy.write.contains(WILDCARD) || self.policy.write.contains(entry.identity())
    }

    /// Deterministic save: equal policies produce equal CIDs.
    pub async fn save(&self, store: &Arc<dyn ObjectStore>) -> Result<Cid, DbError> {
        let bytes =
            serde_json::to_vec(&self.policy).map_err(|e| DbError::Store(e.to_string()))?;
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

    /// Load and parse; coordinators fail open/create when this fails.
    pub async fn load(store: &Arc<dyn ObjectStore>, cid: &Cid) -> Result<Self, DbError> {
        let bytes = store.get(cid).await.map_err(|e| match e {
            StoreError::NotFound => DbError::Store(format!("access controller {cid} not found")),
            other => DbError::Store(other.to_string()),
        })?;
        let policy: Policy = serde_json::from_slice(&bytes)
            .map_err(|e| DbError::Store(format!("bad access controller {cid}: {e}")))?;
        Ok(Self { policy })
    }
}

impl Default for AccessController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::Keypair;
    use crate::objectstore::inmem::MemoryObjectStore;
    use serde_json::json;

    fn entry_by(key: &Keypair) -> Entry {
        Entry::create("log", key, json!("x"), &[]).unwrap()
    }

    #[test]
    fn write_set_gates_append() {
        let good = Keypair::from_seed([1; 32]);
        let bad = Keypair::from_seed([2; 32]);
        let mut ac = AccessController::new();
        ac.add(Role::Write, good.public_key_hex());
        assert!(ac.can_append(&entry_by(&good)));
        assert!(!ac.can_append(&entry_by(&bad)));
    }

    #[test]
    fn wildcard_admits_anyone() {
        let mut ac = AccessController::new();
        ac.add(Role::Write, WILDCARD);
        assert!(ac.can_append(&entry_by(&Keypair::from_seed([3; 32]))));
    }

    #[test]
    fn admin_role_does_not_authorize_appends() {
        let key = Keypair::from_seed([4; 32]);
        let mut ac = AccessController::new();
        ac.add(Role::Admin, key.public_key_hex());
        assert!(!ac.can_append(&entry_by(&key)));
    }

    #[tokio::test]
    async fn save_is_deterministic_across_insertion_order() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let mut a = AccessController::new();
        a.add(Role::Write, "k1");
        a.add(Role::Write, "k2");
        let mut b = AccessController::new();
        b.add(Role::Write, "k2");
        b.add(Role::Write, "k1");
        assert_eq!(a.save(&store).await.unwrap(), b.save(&store).await.unwrap());
    }

    #[tokio::test]
    async fn load_round_trip_and_garbage_rejection() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let mut ac = AccessController::new();
        ac.add(Role::Admin, "boss");
        ac.add(Role::Write, "k1");
        let cid = ac.save(&store).await.unwrap();
        assert_eq!(AccessController::load(&store, &cid).await.unwrap(), ac);

        let junk = store.put(b"[]".to_vec()).await.unwrap();
        assert!(AccessController::load(&store, &junk).await.is_err());
    }
}
