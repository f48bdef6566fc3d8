use std::path::Path;

use cid::Cid;
use redb::backends::InMemoryBackend;
use redb::{Database, TableDefinition};

use crate::error::DbError;

const CACHE_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("braiddb_cache");

/// Keyed blob store remembering per-database state across restarts:
/// the manifest CID and the last known local/remote head CIDs.
pub struct Cache {
    db: Database,
}

pub fn manifest_key(address: &str) -> String {
    format!("{address}/_manifest")
}

pub fn local_heads_key(address: &str) -> String {
    format!("{address}/_localHeads")
}

pub fn remote_heads_key(address: &str) -> String {
    format!("{address}/_remoteHeads")
}

impl Cache {
    /// Open (or create) the cache file under `directory`.
    pub fn open(directory: &Path) -> Result<Self, DbError> {
        std::fs::create_dir_all(directory).map_err(|e| DbError::Cache(e.to_string()))?;
        let db = Database::create(directory.join("braiddb-cache.redb"))
            .map_err(|e| DbError::Cache(e.to_string()))?;
        Ok(Self { db })
    }

    /// Ephemeral cache for coordinators opened without a directory.
    pub fn in_memory() -> Result<Self, DbError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(|e| DbError::Cache(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DbError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| DbError::Cache(e.to_string()))?;
        let table = match txn.open_table(CACHE_TABLE) {
            Ok(t) => t,
            // Nothing has been written yet.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(DbError::Cache(e.to_string())),
        };
        let got = table.get(key).map_err(|e| DbError::Cache(e.to_string()))?;
        Ok(got.map(|v| v.value()))
    }

    pub fn set(&self, key: &str, value: Vec<u8>) -> Result<(), DbError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| DbError::Cache(e.to_string()))?;
        {
            let mut table = txn
                .open_table(CACHE_TABLE)
                .map_err(|e| DbError::Cache(e.to_string()))?;
            table
                .insert(key, value)
                .map_err(|e| DbError::Cache(e.to_string()))?;
        }
        txn.commit().map_err(|e| DbError::Cache(e.to_string()))
    }

    pub fn delete(&self, key: &str) -> Result<(), DbError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| DbError::Cache(e.to_string()))?;
        {
            let mut table = txn
                .open_table(CACHE_TABLE)
                .map_err(|e| DbError::Cache(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| DbError::Cache(e.to_string()))?;
        }
        txn.commit().map_err(|e| DbError::Cache(e.to_string()))
    }
}

/// Compact head-set encoding for cache records and gossip frames.
pub fn encode_cids(cids: &[Cid]) -> Vec<u8> {
    let raw: Vec<Vec<u8>> = cids.iter().map(|c| c.to_bytes()).collect();
    bincode::encode_to_vec(&raw, bincode::config::standard())
        .expect("vec of byte vecs always encodes")
}

pub fn decode_cids(bytes: &[u8]) -> Result<Vec<Cid>, DbError> {
    let (raw, _): (Vec<Vec<u8>>, _) =
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| DbError::Cache(e.to_string()))?;
    raw.iter()
        .map(|b| Cid::try_from(b.as_slice()).map_err(|e| DbError::Cache(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::cid_for;
    use tempfile::tempdir;

    #[test]
    fn get_set_delete_round_trip() {
        let cache = Cache::in_memory().unwrap();
        assert_eq!(cache.get("missing").unwrap(), None);
        cache.set("k", b"v".to_vec()).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(b"v".to_vec()));
        cache.delete("k").unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let cache = Cache::open(dir.path()).unwrap();
            cache.set("addr/_manifest", b"cid".to_vec()).unwrap();
        }
        let cache = Cache::open(dir.path()).unwrap();
        assert_eq!(cache.get("addr/_manifest").unwrap(), Some(b"cid".to_vec()));
    }

    #[test]
    fn cid_set_round_trip() {
        let cids = vec![cid_for(b"a"), cid_for(b"b")];
        let bytes = encode_cids(&cids);
        assert_eq!(decode_cids(&bytes).unwrap(), cids);
    }
}
