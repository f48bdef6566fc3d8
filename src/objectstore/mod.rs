pub mod inmem;

use async_trait::async_trait;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};

/// Raw binary codec for CIDv1.
const RAW: u64 = 0x55;

/// CID of a canonical serialization: SHA2-256, CIDv1, raw codec.
/// Deterministic: same bytes, same CID.
pub fn cid_for(bytes: &[u8]) -> Cid {
    Cid::new_v1(RAW, Code::Sha2_256.digest(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    Timeout,
    Transport(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "object not found"),
            StoreError::Timeout => write!(f, "object store timeout"),
            StoreError::Transport(e) => write!(f, "transport: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Content-addressed object store shared by every coordinator in a process.
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes`, returning their CID. Idempotent.
    async fn put(&self, bytes: Vec<u8>) -> Result<Cid, StoreError>;

    /// Fetch the bytes behind `cid`.
    async fn get(&self, cid: &Cid) -> Result<Vec<u8>, StoreError>;

    /// Protect `cid` from garbage collection.
    async fn pin(&self, cid: &Cid) -> Result<(), StoreError>;
}
