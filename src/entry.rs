use std::cmp::Ordering;

use cid::Cid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::clock::LamportClock;
use crate::error::DbError;
use crate::keystore::{verify_hex_signature, Keypair};
use crate::objectstore::cid_for;

pub const ENTRY_VERSION: u8 = 1;

/// Canonical wire form of a log entry. Field order is the canonical order;
/// `hash` is never part of the hashed bytes, `sig` is omitted from the
/// signed bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryData {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hash: Option<String>,
    pub id: String,
    pub payload: Value,
    pub next: Vec<String>,
    pub v: u8,
    pub clock: LamportClock,
    pub key: String,
    pub identity: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub sig: String,
}

/// A single immutable log record with its content address.
#[derive(Clone, Debug)]
pub struct Entry {
    cid: Cid,
    data: EntryData,
    parents: SmallVec<[Cid; 2]>,
}

impl Entry {
    /// Construct, clock and sign a new entry on top of `parents`.
    pub fn create(
        log_id: &str,
        key: &Keypair,
        payload: Value,
        parents: &[&Entry],
    ) -> Result<Entry, DbError> {
        let public = key.public_key_hex().to_string();
        let clock = LamportClock::tick_past(public.clone(), parents.iter().map(|p| p.clock().time));
        let mut data = EntryData {
            hash: None,
            id: log_id.to_string(),
            payload,
            next: parents.iter().map(|p| p.cid().to_string()).collect(),
            v: ENTRY_VERSION,
            clock,
            key: public.clone(),
            identity: public,
            sig: String::new(),
        };
        let signing_bytes = canonical_bytes(&data)?;
        data.sig = key.sign_hex(&signing_bytes);

        let bytes = canonical_bytes(&data)?;
        let cid = cid_for(&bytes);
        let parents = parents.iter().map(|p| p.cid).collect();
        Ok(Entry { cid, data, parents })
    }

    /// Decode an entry fetched from the object store. Performs the
    /// structural checks; signature and policy checks live in [`verify`].
    ///
    /// [`verify`]: Entry::verify
    pub fn from_bytes(bytes: &[u8]) -> Result<Entry, DbError> {
        let data: EntryData = serde_json::from_slice(bytes)
            .map_err(|e| DbError::MalformedEntry(format!("bad entry json: {e}")))?;
        if data.v != ENTRY_VERSION {
            return Err(DbError::MalformedEntry(format!(
                "unsupported entry version {}",
                data.v
            )));
        }
        if data.clock.time == 0 {
            return Err(DbError::MalformedEntry("clock.time must be >= 1".into()));
        }
        if data.clock.id != data.identity {
            return Err(DbError::MalformedEntry(
                "clock id does not match identity".into(),
            ));
        }
        if data.sig.is_empty() {
            return Err(DbError::MalformedEntry("missing signature".into()));
        }
        let mut parents = SmallVec::new();
        for s in &data.next {
            let cid = s
                .parse::<Cid>()
                .map_err(|e| DbError::MalformedEntry(format!("bad parent cid {s}: {e}")))?;
            parents.push(cid);
        }

        let canonical = canonical_bytes(&data)?;
        let cid = cid_for(&canonical);
        if let Some(claimed) = &data.hash {
            if claimed != &cid.to_string() {
                return Err(DbError::InvalidEntry(format!(
                    "claimed hash {claimed} does not match content"
                )));
            }
        }
        Ok(Entry { cid, data, parents })
    }

    /// Canonical serialization; hashing these bytes reproduces the CID.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DbError> {
        canonical_bytes(&self.data)
    }

    /// Signature check against the entry's identity key.
    pub fn verify_signature(&self) -> Result<(), DbError> {
        let mut unsigned = self.data.clone();
        unsigned.hash = None;
        unsigned.sig = String::new();
        let bytes = canonical_bytes(&unsigned)?;
        verify_hex_signature(&self.data.identity, &bytes, &self.data.sig)
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn log_id(&self) -> &str {
        &self.data.id
    }

    pub fn payload(&self) -> &Value {
        &self.data.payload
    }

    pub fn parents(&self) -> &[Cid] {
        &self.parents
    }

    pub fn clock(&self) -> &LamportClock {
        &self.data.clock
    }

    pub fn identity(&self) -> &str {
        &self.data.identity
    }

    pub fn data(&self) -> &EntryData {
        &self.data
    }

    /// Deterministic total order: `(clock.time, clock.id, cid)`.
    pub fn total_cmp(&self, other: &Entry) -> Ordering {
        self.data
            .clock
            .cmp(&other.data.clock)
            .then_with(|| self.cid.cmp(&other.cid))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cid == other.cid
    }
}
impl Eq for Entry {}

fn canonical_bytes(data: &EntryData) -> Result<Vec<u8>, DbError> {
    let mut canonical = data.clone();
    canonical.hash = None;
    serde_json::to_vec(&canonical).map_err(|e| DbError::MalformedEntry(e.to_string()))
}
