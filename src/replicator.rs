use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cid::Cid;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::access::AccessController;
use crate::cache::{self, Cache};
use crate::entry::Entry;
use crate::error::DbError;
use crate::events::{DbEvent, Emitter};
use crate::objectstore::{ObjectStore, StoreError};
use crate::oplog::Oplog;
use crate::replication_info::ReplicationInfo;

#[derive(Clone, Debug)]
pub struct ReplicatorOptions {
    /// Entries concurrently in fetch/validate.
    pub concurrency: usize,
    /// Per-attempt object-store fetch timeout.
    pub fetch_timeout: Duration,
    /// Attempts before a CID is marked failed for the session.
    pub max_attempts: u32,
    /// First retry backoff; doubles per attempt, with jitter.
    pub retry_base: Duration,
}

impl Default for ReplicatorOptions {
    fn default() -> Self {
        Self {
            concurrency: 32,
            fetch_timeout: Duration::from_secs(10),
            max_attempts: 5,
            retry_base: Duration::from_millis(100),
        }
    }
}

enum Cmd {
    Sync(Vec<Cid>),
}

enum FetchOutcome {
    /// Fetched, structurally sound, signed, authorized.
    Fetched(Entry),
    /// Dropped: bad structure, bad signature, or policy rejection.
    Invalid { cid: Cid, err: DbError },
    /// Terminal fetch failure; retried on the next gossip delivery.
    Failed { cid: Cid, err: DbError },
}

/// Reconciles the local oplog with remote heads: fetches the transitive
/// closure of missing entries with bounded concurrency, validates each,
/// and merges causally-complete batches in the deterministic total order.
///
/// All oplog and replication-info mutation happens on the worker task;
/// fetch tasks only touch the object store.
pub struct Replicator {
    cmd_tx: mpsc::Sender<Cmd>,
    task: JoinHandle<()>,
}

impl Replicator {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        address: String,
        oplog: Arc<Mutex<Oplog>>,
        access: Arc<AccessController>,
        store: Arc<dyn ObjectStore>,
        local_cache: Arc<Cache>,
        info: Arc<Mutex<ReplicationInfo>>,
        emitter: Arc<Emitter>,
        opts: ReplicatorOptions,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (res_tx, res_rx) = mpsc::channel(64);
        let worker = Worker {
            address,
            oplog,
            access,
            store,
            local_cache,
            info,
            emitter,
            opts,
            res_tx,
            queue: VecDeque::new(),
            seen: HashSet::new(),
            targets: HashSet::new(),
            waiting: HashMap::new(),
            missing: HashMap::new(),
            fetched: HashMap::new(),
            failed: HashSet::new(),
            inflight: 0,
        };
        let task = tokio::spawn(worker.run(cmd_rx, res_rx));
        Self { cmd_tx, task }
    }

    /// Feed a set of advertised remote heads. Idempotent: CIDs already
    /// merged, queued or in flight are skipped.
    pub async fn sync(&self, heads: Vec<Cid>) -> Result<(), DbError> {
        self.cmd_tx
            .send(Cmd::Sync(heads))
            .await
            .map_err(|_| DbError::Closed)
    }

    /// Cloneable handle for feeding heads from the gossip loop.
    pub fn syncer(&self) -> Syncer {
        Syncer(self.cmd_tx.clone())
    }

    /// Cancel in-flight work. Partially validated entries are discarded;
    /// merges already applied stay (they are idempotent to redo).
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct Syncer(mpsc::Sender<Cmd>);

impl Syncer {
    pub async fn sync(&self, heads: Vec<Cid>) -> Result<(), DbError> {
        self.0
            .send(Cmd::Sync(heads))
            .await
            .map_err(|_| DbError::Closed)
    }
}

struct Worker {
    address: String,
    oplog: Arc<Mutex<Oplog>>,
    access: Arc<AccessController>,
    store: Arc<dyn ObjectStore>,
    local_cache: Arc<Cache>,
    info: Arc<Mutex<ReplicationInfo>>,
    emitter: Arc<Emitter>,
    opts: ReplicatorOptions,
    res_tx: mpsc::Sender<FetchOutcome>,

    queue: VecDeque<Cid>,
    /// Everything ever scheduled this session (queued, in flight, done).
    seen: HashSet<Cid>,
    /// Advertised heads not yet inspected; drive `replication_info.max`.
    targets: HashSet<Cid>,
    /// Missing parent CID -> dependents held back on it.
    waiting: HashMap<Cid, Vec<Cid>>,
    /// Dependent CID -> count of still-missing parents.
    missing: HashMap<Cid, usize>,
    /// Validated entries held back until their parents resolve.
    fetched: HashMap<Cid, Entry>,
    /// Terminal fetch failures, retried on the next sync.
    failed: HashSet<Cid>,
    inflight: usize,
}

impl Worker {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Cmd>, mut res_rx: mpsc::Receiver<FetchOutcome>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Cmd::Sync(heads)) => self.on_sync(heads),
                    None => break,
                },
                out = res_rx.recv() => {
                    // Never closes: the worker keeps a sender for spawning.
                    if let Some(out) = out {
                        self.on_result(out);
                    }
                }
            }
            self.pump();
        }
    }

    fn on_sync(&mut self, heads: Vec<Cid>) {
        for cid in heads {
            if self.seen.contains(&cid) || self.oplog.lock().unwrap().has(&cid) {
                continue;
            }
            self.seen.insert(cid);
            self.targets.insert(cid);
            self.queue.push_back(cid);
        }
        // Terminal failures get another chance whenever gossip speaks up.
        let retries: Vec<Cid> = self.failed.drain().collect();
        for cid in retries {
            self.queue.push_back(cid);
        }
    }

    fn pump(&mut self) {
        while self.inflight < self.opts.concurrency {
            let Some(cid) = self.queue.pop_front() else {
                break;
            };
            self.inflight += 1;
            let store = self.store.clone();
            let access = self.access.clone();
            let address = self.address.clone();
            let res_tx = self.res_tx.clone();
            let opts = self.opts.clone();
            tokio::spawn(async move {
                let outcome = fetch_and_validate(cid, store, access, address, opts).await;
                let _ = res_tx.send(outcome).await;
            });
        }
    }

    fn on_result(&mut self, outcome: FetchOutcome) {
        self.inflight -= 1;
        match outcome {
            FetchOutcome::Fetched(entry) => self.on_fetched(entry),
            FetchOutcome::Invalid { cid, err } => {
                debug!(%cid, %err, "replicator: dropping invalid entry");
                self.drop_descendants(cid);
            }
            FetchOutcome::Failed { cid, err } => {
                warn!(%cid, %err, "replicator: fetch failed, will retry on next gossip");
                self.failed.insert(cid);
            }
        }
    }

    fn on_fetched(&mut self, entry: Entry) {
        let cid = *entry.cid();
        self.emitter.emit(DbEvent::Replicate {
            address: self.address.clone(),
            entry: entry.clone(),
        });

        if self.targets.remove(&cid) {
            self.info
                .lock()
                .unwrap()
                .observe(entry.clock().time);
        }

        let mut unresolved = 0;
        {
            let log = self.oplog.lock().unwrap();
            for parent in entry.parents() {
                if log.has(parent) {
                    continue;
                }
                unresolved += 1;
                self.waiting.entry(*parent).or_default().push(cid);
                if self.seen.insert(*parent) {
                    self.queue.push_back(*parent);
                }
            }
        }

        if unresolved == 0 {
            self.merge_cascade(entry);
        } else {
            self.missing.insert(cid, unresolved);
            self.fetched.insert(cid, entry);
        }
    }

    /// Merge `root` plus every held-back entry it unblocks, as one batch
    /// in the deterministic total order.
    fn merge_cascade(&mut self, root: Entry) {
        let mut batch = Vec::new();
        let mut stack = vec![root];
        while let Some(entry) = stack.pop() {
            if let Some(deps) = self.waiting.remove(entry.cid()) {
                for dep in deps {
                    let Some(count) = self.missing.get_mut(&dep) else {
                        continue;
                    };
                    *count -= 1;
                    if *count == 0 {
                        self.missing.remove(&dep);
                        if let Some(e) = self.fetched.remove(&dep) {
                            stack.push(e);
                        }
                    }
                }
            }
            batch.push(entry);
        }
        batch.sort_by(|a, b| a.total_cmp(b));

        let added = {
            let mut log = self.oplog.lock().unwrap();
            match log.merge(batch, &self.access) {
                Ok(added) => added,
                Err(e) => {
                    // Candidates were pre-validated; a failure here means
                    // the policy changed under us. Drop the batch.
                    warn!(error = %e, "replicator: merge rejected batch");
                    return;
                }
            }
        };
        if added.is_empty() {
            return;
        }

        for entry in &added {
            let snapshot = {
                let mut info = self.info.lock().unwrap();
                info.mark_merged(entry.clock().time);
                info.clone()
            };
            self.emitter.emit(DbEvent::ReplicateProgress {
                address: self.address.clone(),
                cid: *entry.cid(),
                entry: entry.clone(),
                info: snapshot,
            });
        }
        self.emitter.emit(DbEvent::Replicated {
            address: self.address.clone(),
            length: added.len(),
        });

        let heads = self.oplog.lock().unwrap().heads();
        if let Err(e) = self
            .local_cache
            .set(&cache::remote_heads_key(&self.address), cache::encode_cids(&heads))
        {
            warn!(error = %e, "replicator: failed to persist remote heads");
        }
    }

    /// Abandon everything transitively held back on `cid`.
    fn drop_descendants(&mut self, cid: Cid) {
        let mut stack = vec![cid];
        while let Some(c) = stack.pop() {
            if let Some(deps) = self.waiting.remove(&c) {
                for dep in deps {
                    self.missing.remove(&dep);
                    if self.fetched.remove(&dep).is_some() {
                        debug!(cid = %dep, "replicator: abandoning descendant of dropped entry");
                    }
                    stack.push(dep);
                }
            }
        }
    }
}

async fn fetch_and_validate(
    cid: Cid,
    store: Arc<dyn ObjectStore>,
    access: Arc<AccessController>,
    address: String,
    opts: ReplicatorOptions,
) -> FetchOutcome {
    let bytes = match fetch_with_retry(&cid, &*store, &opts).await {
        Ok(bytes) => bytes,
        Err(err) => return FetchOutcome::Failed { cid, err },
    };

    let entry = match Entry::from_bytes(&bytes) {
        Ok(e) => e,
        Err(err) => return FetchOutcome::Invalid { cid, err },
    };
    if entry.cid() != &cid {
        return FetchOutcome::Invalid {
            cid,
            err: DbError::InvalidEntry(format!("content hashes to {}", entry.cid())),
        };
    }
    if entry.log_id() != address {
        return FetchOutcome::Invalid {
            cid,
            err: DbError::InvalidEntry(format!("entry belongs to {}", entry.log_id())),
        };
    }
    if let Err(err) = entry.verify_signature() {
        return FetchOutcome::Invalid { cid, err };
    }
    if !access.can_append(&entry) {
        return FetchOutcome::Invalid {
            cid,
            err: DbError::NotAuthorized,
        };
    }
    FetchOutcome::Fetched(entry)
}

async fn fetch_with_retry(
    cid: &Cid,
    store: &dyn ObjectStore,
    opts: &ReplicatorOptions,
) -> Result<Vec<u8>, DbError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let transient = match tokio::time::timeout(opts.fetch_timeout, store.get(cid)).await {
            Ok(Ok(bytes)) => return Ok(bytes),
            Ok(Err(StoreError::NotFound)) => {
                return Err(DbError::FetchFailed(format!("{cid} not found")));
            }
            Ok(Err(e)) => DbError::TransportTransient(e.to_string()),
            Err(_) => DbError::TransportTransient("fetch attempt timed out".into()),
        };
        if attempt >= opts.max_attempts {
            return Err(DbError::FetchFailed(transient.to_string()));
        }
        let backoff = opts.retry_base * 2u32.saturating_pow(attempt - 1);
        let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis().max(2) as u64 / 2);
        debug!(%cid, attempt, ?backoff, "replicator: retrying fetch");
        tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
    }
}
