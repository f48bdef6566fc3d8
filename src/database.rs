use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bincode::{Decode, Encode};
use cid::Cid;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::access::{AccessController, Role};
use crate::address::Address;
use crate::cache::{self, Cache};
use crate::entry::Entry;
use crate::error::DbError;
use crate::events::{DbEvent, Emitter};
use crate::gossip::{GossipBus, GossipEvent, TopicRoom};
use crate::keystore::{KeyStore, Keypair};
use crate::manifest::Manifest;
use crate::objectstore::ObjectStore;
use crate::oplog::Oplog;
use crate::peer_id::PeerId;
use crate::replication_info::ReplicationInfo;
use crate::replicator::{Replicator, ReplicatorOptions, Syncer};
use crate::views::StoreType;

/// Key-store slot for the coordinator's own signing key.
const SELF_KEY: &str = "self";

#[derive(Clone, Debug)]
pub struct OpenOptions {
    /// Create the database if it does not exist (required for bare names).
    pub create: bool,
    /// Expected (or, when creating, chosen) store type.
    pub store_type: Option<StoreType>,
    /// Allow `create` over an address this directory already knows.
    pub overwrite: bool,
    /// Fail instead of creating or fetching anything non-local.
    pub local_only: bool,
    /// Skip seeding from the local cache; wait for remote heads.
    pub sync: bool,
    /// Join the gossip topic. Off means a purely local database.
    pub replicate: bool,
    /// Write-access keys for creation; empty means "just the creator".
    pub write: Vec<String>,
    /// Cache directory. None keeps the cache in memory.
    pub directory: Option<PathBuf>,
    pub replicator: ReplicatorOptions,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create: false,
            store_type: None,
            overwrite: false,
            local_only: false,
            sync: false,
            replicate: true,
            write: Vec::new(),
            directory: None,
            replicator: ReplicatorOptions::default(),
        }
    }
}

/// Head advertisement gossiped on the database's topic.
#[derive(Clone, Debug, Encode, Decode)]
struct HeadsAnnounce {
    address: String,
    heads: Vec<Vec<u8>>,
}

fn encode_announce(address: &str, heads: &[Cid]) -> Vec<u8> {
    let frame = HeadsAnnounce {
        address: address.to_string(),
        heads: heads.iter().map(|c| c.to_bytes()).collect(),
    };
    bincode::encode_to_vec(&frame, bincode::config::standard())
        .expect("announce frame always encodes")
}

fn decode_announce(bytes: &[u8]) -> Result<(String, Vec<Cid>), DbError> {
    let (frame, _): (HeadsAnnounce, _) =
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| DbError::Gossip(e.to_string()))?;
    let mut heads = Vec::with_capacity(frame.heads.len());
    for raw in &frame.heads {
        heads.push(
            Cid::try_from(raw.as_slice()).map_err(|e| DbError::Gossip(e.to_string()))?,
        );
    }
    Ok((frame.address, heads))
}

/// Database coordinator: owns the oplog, the replicator, the gossip
/// subscription, the cache and the event fan-out for one database.
pub struct Database {
    address: String,
    name: String,
    store_type: StoreType,
    peer_id: PeerId,
    key: Arc<Keypair>,
    store: Arc<dyn ObjectStore>,
    local_cache: Arc<Cache>,
    oplog: Arc<Mutex<Oplog>>,
    access: Arc<AccessController>,
    info: Arc<Mutex<ReplicationInfo>>,
    emitter: Arc<Emitter>,
    room: Option<Arc<dyn TopicRoom>>,
    replicator: Replicator,
    syncer: Syncer,
    event_task: Mutex<Option<JoinHandle<()>>>,
    // Serializes local appends: the head snapshot, the object-store put
    // and the merge must act as one write (the oplog is single-writer).
    write_gate: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("store_type", &self.store_type)
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) a database.
    ///
    /// `address_or_name` is either a full `/braiddb/<cid>/<name>` address
    /// or a bare name; bare names require `create == true` and a store
    /// type, and yield a fresh address derived from the new manifest.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        bus: Arc<dyn GossipBus>,
        keys: Arc<dyn KeyStore>,
        address_or_name: &str,
        opts: OpenOptions,
    ) -> Result<Arc<Database>, DbError> {
        let key = match keys.get_key(SELF_KEY).await {
            Some(k) => k,
            None => keys.create_key(SELF_KEY).await,
        };
        let local_cache = Arc::new(match &opts.directory {
            Some(dir) => Cache::open(dir)?,
            None => Cache::in_memory()?,
        });

        let (address, manifest, access) = if Address::is_valid(address_or_name) {
            let addr = Address::parse(address_or_name)?;
            let address = addr.to_string();
            let cached = local_cache.get(&cache::manifest_key(&address))?;
            if opts.local_only && cached.is_none() {
                return Err(DbError::UnknownDatabase(address));
            }
            if opts.create && cached.is_some() && !opts.overwrite {
                return Err(DbError::AlreadyExists(address));
            }
            let manifest = Manifest::load(&store, &addr.root).await?;
            if let Some(want) = opts.store_type {
                if want != manifest.store_type {
                    return Err(DbError::TypeMismatch {
                        expected: want.to_string(),
                        found: manifest.store_type.to_string(),
                    });
                }
            }
            let ac_cid = manifest.access_controller_cid()?;
            let access = AccessController::load(&store, &ac_cid).await?;
            local_cache.set(&cache::manifest_key(&address), addr.root.to_bytes())?;
            (address, manifest, access)
        } else {
            // Bare name: only valid as a creation request.
            if !opts.create {
                return Err(DbError::InvalidAddress(format!(
                    "{address_or_name} is not an address; pass create to make one"
                )));
            }
            let store_type = opts
                .store_type
                .ok_or_else(|| DbError::InvalidType("no store type given".into()))?;
            let mut access = AccessController::new();
            access.add(Role::Admin, key.public_key_hex());
            if opts.write.is_empty() {
                access.add(Role::Write, key.public_key_hex());
            } else {
                for w in &opts.write {
                    access.add(Role::Write, w.clone());
                }
            }
            let ac_cid = access.save(&store).await?;
            let manifest = Manifest::new(address_or_name, store_type, &ac_cid);
            let root = manifest.save(&store).await?;
            let address = Address::new(root, address_or_name).to_string();
            if local_cache.get(&cache::manifest_key(&address))?.is_some() && !opts.overwrite {
                return Err(DbError::AlreadyExists(address));
            }
            local_cache.set(&cache::manifest_key(&address), root.to_bytes())?;
            (address, manifest, access)
        };

        let access = Arc::new(access);
        let oplog = Arc::new(Mutex::new(Oplog::new(&address)));
        let db_info = Arc::new(Mutex::new(ReplicationInfo::new()));
        let emitter = Arc::new(Emitter::new());

        if !opts.sync {
            load_from_cache(&local_cache, &store, &oplog, &access, &db_info, &emitter, &address)
                .await?;
        }

        let replicator = Replicator::start(
            address.clone(),
            oplog.clone(),
            access.clone(),
            store.clone(),
            local_cache.clone(),
            db_info.clone(),
            emitter.clone(),
            opts.replicator.clone(),
        );
        let syncer = replicator.syncer();

        let peer_id = PeerId::new();
        let mut room = None;
        let mut event_task = None;
        if opts.replicate {
            let (gossip_tx, gossip_rx) = mpsc::channel(256);
            let joined = bus
                .subscribe(&address, peer_id, gossip_tx)
                .await
                .map_err(|e| DbError::Gossip(e.to_string()))?;
            event_task = Some(tokio::spawn(gossip_loop(
                gossip_rx,
                address.clone(),
                oplog.clone(),
                joined.clone(),
                syncer.clone(),
                emitter.clone(),
            )));
            room = Some(joined);
        }

        let db = Arc::new(Database {
            address: address.clone(),
            name: manifest.name.clone(),
            store_type: manifest.store_type,
            peer_id,
            key,
            store,
            local_cache,
            oplog,
            access,
            info: db_info,
            emitter,
            room,
            replicator,
            syncer,
            event_task: Mutex::new(event_task),
            write_gate: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        });
        info!(address = %db.address, peer = %db.peer_id, "database open");
        db.emitter.emit(DbEvent::Ready {
            address: db.address.clone(),
        });
        Ok(db)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn public_key_hex(&self) -> &str {
        self.key.public_key_hex()
    }

    pub fn len(&self) -> usize {
        self.oplog.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn heads(&self) -> Vec<Cid> {
        self.oplog.lock().unwrap().heads()
    }

    /// Snapshot of `{max, progress, have}`.
    pub fn replication_info(&self) -> ReplicationInfo {
        self.info.lock().unwrap().clone()
    }

    /// Typed event stream; one independent channel per call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DbEvent> {
        self.emitter.subscribe()
    }

    /// Append a payload to the local oplog.
    ///
    /// The entry is durable in the object store and the oplog before the
    /// `Write` event fires; the head advertisement to the topic is
    /// best-effort and may still be in flight when this returns.
    pub async fn add(&self, payload: Value) -> Result<Entry, DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        // Concurrent adds on one coordinator queue here; without this,
        // two appends could build siblings on the same head snapshot
        // across the store put below.
        let _writing = self.write_gate.lock().await;
        let entry = {
            let log = self.oplog.lock().unwrap();
            let heads = log.head_entries();
            let parents: Vec<&Entry> = heads.iter().collect();
            Entry::create(&self.address, &self.key, payload, &parents)?
        };
        if !self.access.can_append(&entry) {
            return Err(DbError::NotAuthorized);
        }
        self.store
            .put(entry.to_bytes()?)
            .await
            .map_err(|e| DbError::Store(e.to_string()))?;

        let heads = {
            let mut log = self.oplog.lock().unwrap();
            log.merge(vec![entry.clone()], &self.access)?;
            log.heads()
        };
        self.info.lock().unwrap().observe(entry.clock().time);
        self.local_cache
            .set(&cache::local_heads_key(&self.address), cache::encode_cids(&heads))?;
        self.emitter.emit(DbEvent::Write {
            address: self.address.clone(),
            entry: entry.clone(),
            heads: heads.clone(),
        });

        if let Some(room) = &self.room {
            if let Err(e) = room.publish(encode_announce(&self.address, &heads)).await {
                debug!(error = %e, "head publish failed; receivers catch up on join");
            }
        }
        Ok(entry)
    }

    /// Feed remote head CIDs to the replicator. Idempotent.
    pub async fn sync(&self, heads: Vec<Cid>) -> Result<(), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        self.syncer.sync(heads).await
    }

    /// Read the oplog in total order. `limit` keeps the latest N entries
    /// of the selected window (`-1` for all); `gt`/`gte`/`lt`/`lte`
    /// bound the window by entry CID.
    pub fn iterator(&self, opts: IterOptions) -> Vec<Entry> {
        let all = self.oplog.lock().unwrap().all();
        let pos = |cid: &Cid| all.iter().position(|e| e.cid() == cid);
        let mut start = 0usize;
        let mut end = all.len();
        if let Some(c) = &opts.gte {
            if let Some(i) = pos(c) {
                start = i;
            }
        }
        if let Some(c) = &opts.gt {
            if let Some(i) = pos(c) {
                start = i + 1;
            }
        }
        if let Some(c) = &opts.lte {
            if let Some(i) = pos(c) {
                end = i + 1;
            }
        }
        if let Some(c) = &opts.lt {
            if let Some(i) = pos(c) {
                end = i;
            }
        }
        let window = &all[start.min(end)..end];
        if opts.limit < 0 {
            window.to_vec()
        } else {
            let keep = (opts.limit as usize).min(window.len());
            window[window.len() - keep..].to_vec()
        }
    }

    /// Release resources and persist the cache. Idempotent.
    pub async fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let heads = self.oplog.lock().unwrap().heads();
        if let Err(e) = self
            .local_cache
            .set(&cache::local_heads_key(&self.address), cache::encode_cids(&heads))
        {
            warn!(error = %e, "close: failed to flush heads");
        }
        if let Some(room) = &self.room {
            room.leave().await;
        }
        if let Some(task) = self.event_task.lock().unwrap().take() {
            task.abort();
        }
        self.replicator.shutdown();
        self.emitter.emit(DbEvent::Closed {
            address: self.address.clone(),
        });
        Ok(())
    }

    /// Close, then wipe this database's local cache entries.
    pub async fn destroy(&self) -> Result<(), DbError> {
        self.close().await?;
        self.local_cache.delete(&cache::manifest_key(&self.address))?;
        self.local_cache
            .delete(&cache::local_heads_key(&self.address))?;
        self.local_cache
            .delete(&cache::remote_heads_key(&self.address))?;
        self.info.lock().unwrap().reset();
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct IterOptions {
    pub gt: Option<Cid>,
    pub gte: Option<Cid>,
    pub lt: Option<Cid>,
    pub lte: Option<Cid>,
    pub limit: i64,
}

impl Default for IterOptions {
    fn default() -> Self {
        Self {
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            limit: 1,
        }
    }
}

impl IterOptions {
    /// The whole log, oldest first.
    pub fn all() -> Self {
        Self {
            limit: -1,
            ..Self::default()
        }
    }
}

/// Seed the oplog from cached head CIDs by walking ancestors through the
/// object store. Best-effort: unreachable entries are logged and skipped.
async fn load_from_cache(
    local_cache: &Arc<Cache>,
    store: &Arc<dyn ObjectStore>,
    oplog: &Arc<Mutex<Oplog>>,
    access: &Arc<AccessController>,
    info: &Arc<Mutex<ReplicationInfo>>,
    emitter: &Arc<Emitter>,
    address: &str,
) -> Result<(), DbError> {
    let mut queue: VecDeque<Cid> = VecDeque::new();
    for key in [
        cache::local_heads_key(address),
        cache::remote_heads_key(address),
    ] {
        if let Some(bytes) = local_cache.get(&key)? {
            queue.extend(cache::decode_cids(&bytes)?);
        }
    }
    if queue.is_empty() {
        return Ok(());
    }

    let mut visited: HashSet<Cid> = HashSet::new();
    let mut collected = Vec::new();
    while let Some(cid) = queue.pop_front() {
        if !visited.insert(cid) {
            continue;
        }
        let bytes = match store.get(&cid).await {
            Ok(b) => b,
            Err(e) => {
                warn!(%cid, error = %e, "load: cached entry unreachable");
                continue;
            }
        };
        match Entry::from_bytes(&bytes) {
            Ok(entry) if entry.cid() == &cid && entry.log_id() == address => {
                queue.extend(entry.parents().iter().copied());
                collected.push(entry);
            }
            Ok(entry) => warn!(%cid, log = %entry.log_id(), "load: entry from another log"),
            Err(e) => warn!(%cid, error = %e, "load: undecodable cached entry"),
        }
    }

    let added = oplog.lock().unwrap().merge(collected, access)?;
    {
        let mut g = info.lock().unwrap();
        for entry in &added {
            g.observe(entry.clock().time);
        }
    }
    for entry in added {
        emitter.emit(DbEvent::LoadProgress {
            address: address.to_string(),
            entry,
        });
    }
    Ok(())
}

/// Gossip subscription loop: remote head announcements feed the
/// replicator; peer joins get our current heads directly.
async fn gossip_loop(
    mut rx: mpsc::Receiver<GossipEvent>,
    address: String,
    oplog: Arc<Mutex<Oplog>>,
    room: Arc<dyn TopicRoom>,
    syncer: Syncer,
    emitter: Arc<Emitter>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            GossipEvent::Message { from, payload } => match decode_announce(&payload) {
                Ok((addr, heads)) if addr == address => {
                    if syncer.sync(heads).await.is_err() {
                        break;
                    }
                }
                Ok((addr, _)) => debug!(%from, %addr, "gossip: frame for another database"),
                Err(e) => debug!(%from, error = %e, "gossip: undecodable frame"),
            },
            GossipEvent::PeerJoined { peer } => {
                emitter.emit(DbEvent::PeerConnected {
                    address: address.clone(),
                    peer,
                });
                let heads = oplog.lock().unwrap().heads();
                if !heads.is_empty() {
                    if let Err(e) = room.send_to(peer, encode_announce(&address, &heads)).await {
                        debug!(%peer, error = %e, "gossip: direct head send failed");
                    }
                }
            }
        }
    }
}
