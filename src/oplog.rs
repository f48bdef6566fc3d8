use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use cid::Cid;
use serde_json::Value;
use tracing::debug;

use crate::access::AccessController;
use crate::entry::Entry;
use crate::error::DbError;
use crate::keystore::Keypair;

/// Append-only Merkle-DAG of signed entries forming one database's history.
///
/// Invariants:
/// - closed under parents: an entry is only inserted once all of its
///   parents are present (the replicator withholds causally-incomplete
///   entries until their ancestors arrive);
/// - `heads` is exactly the set of entries not referenced as a parent by
///   any other entry in the log;
/// - `all()` yields the deterministic `(clock.time, clock.id, cid)` order
///   regardless of arrival order.
pub struct Oplog {
    id: String,
    entries: HashMap<Cid, Entry>,
    heads: BTreeSet<Cid>,
    // Every CID referenced as a parent by an inserted entry. A late
    // arriving entry that is already referenced never becomes a head.
    referenced: HashSet<Cid>,
}

impl Oplog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: HashMap::new(),
            heads: BTreeSet::new(),
            referenced: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, cid: &Cid) -> bool {
        self.entries.contains_key(cid)
    }

    pub fn get(&self, cid: &Cid) -> Option<&Entry> {
        self.entries.get(cid)
    }

    pub fn heads(&self) -> Vec<Cid> {
        self.heads.iter().copied().collect()
    }

    /// Head entries in deterministic (CID) order.
    pub fn head_entries(&self) -> Vec<Entry> {
        self.heads
            .iter()
            .filter_map(|c| self.entries.get(c).cloned())
            .collect()
    }

    /// Entries none of whose parents are present: the bottom of the DAG.
    pub fn tails(&self) -> Vec<Entry> {
        let mut tails: Vec<Entry> = self
            .entries
            .values()
            .filter(|e| e.parents().iter().all(|p| !self.entries.contains_key(p)))
            .cloned()
            .collect();
        tails.sort_by(|a, b| a.total_cmp(b));
        tails
    }

    /// Construct, sign and adopt a new local entry on top of the current
    /// heads. Single-writer: concurrent local appends must be serialized
    /// by the caller.
    pub fn append(&mut self, key: &Keypair, payload: Value) -> Result<Entry, DbError> {
        let heads = self.head_entries();
        let parents: Vec<&Entry> = heads.iter().collect();
        let entry = Entry::create(&self.id, key, payload, &parents)?;
        self.insert(entry.clone());
        Ok(entry)
    }

    /// Merge entries, skipping duplicates, verifying every candidate
    /// against the signature and access policy, and recomputing heads.
    /// All-or-nothing: a rejected candidate fails the whole batch before
    /// anything is inserted. Idempotent; returns the added entries in the
    /// deterministic total order.
    pub fn merge(
        &mut self,
        candidates: Vec<Entry>,
        access: &AccessController,
    ) -> Result<Vec<Entry>, DbError> {
        let mut fresh: Vec<Entry> = candidates
            .into_iter()
            .filter(|e| !self.entries.contains_key(e.cid()))
            .collect();
        fresh.sort_by(|a, b| a.total_cmp(b));
        fresh.dedup_by(|a, b| a.cid() == b.cid());

        // Validate the whole batch before touching any state: entries
        // merged ahead of a rejected candidate must not linger.
        for entry in &fresh {
            entry.verify_signature()?;
            if !access.can_append(entry) {
                return Err(DbError::NotAuthorized);
            }
        }

        let mut added = Vec::with_capacity(fresh.len());
        for entry in fresh {
            if !entry
                .parents()
                .iter()
                .all(|p| self.entries.contains_key(p))
            {
                // Causally incomplete; the replicator holds such entries
                // back, so this only happens on misuse of the local API.
                debug!(cid = %entry.cid(), "oplog: skipping entry with missing parents");
                continue;
            }
            self.insert(entry.clone());
            added.push(entry);
        }
        Ok(added)
    }

    fn insert(&mut self, entry: Entry) {
        let cid = *entry.cid();
        for p in entry.parents() {
            self.referenced.insert(*p);
            self.heads.remove(p);
        }
        if !self.referenced.contains(&cid) {
            self.heads.insert(cid);
        }
        self.entries.insert(cid, entry);
    }

    /// All entries in `(clock.time, clock.id, cid)` order.
    pub fn all(&self) -> Vec<Entry> {
        let mut out: Vec<Entry> = self.entries.values().cloned().collect();
        out.sort_by(|a, b| a.total_cmp(b));
        out
    }

    /// Walk ancestors breadth-first from `start`, yielding at most
    /// `amount` entries (`-1` for unlimited) and pruning branches at
    /// `end` CIDs.
    pub fn traverse(&self, start: &[Cid], amount: i64, end: &HashSet<Cid>) -> Vec<Entry> {
        let mut out = Vec::new();
        let mut queue: VecDeque<Cid> = start.iter().copied().collect();
        let mut visited: HashSet<Cid> = HashSet::new();
        while let Some(cid) = queue.pop_front() {
            if amount >= 0 && out.len() as i64 >= amount {
                break;
            }
            if !visited.insert(cid) || end.contains(&cid) {
                continue;
            }
            let Some(entry) = self.entries.get(&cid) else {
                continue;
            };
            out.push(entry.clone());
            for p in entry.parents() {
                queue.push_back(*p);
            }
        }
        out
    }
}
