use std::sync::Mutex;

use cid::Cid;
use tokio::sync::mpsc;

use crate::entry::Entry;
use crate::peer_id::PeerId;
use crate::replication_info::ReplicationInfo;

/// Typed coordinator events. Delivered over per-subscriber channels so
/// handlers never run inside the coordinator's serialized context (no
/// re-entry).
#[derive(Clone, Debug)]
pub enum DbEvent {
    /// A local append is durable in the object store and the oplog.
    Write {
        address: String,
        entry: Entry,
        heads: Vec<Cid>,
    },
    /// Open finished (including any cache load).
    Ready { address: String },
    /// One entry restored from the local cache during open.
    LoadProgress { address: String, entry: Entry },
    /// A remote entry was fetched and validated.
    Replicate { address: String, entry: Entry },
    /// A remote entry was merged; `info` is a snapshot taken at emit time.
    ReplicateProgress {
        address: String,
        cid: Cid,
        entry: Entry,
        info: ReplicationInfo,
    },
    /// A merge batch completed; `length` entries were added.
    Replicated { address: String, length: usize },
    Closed { address: String },
    PeerConnected { address: String, peer: PeerId },
}

/// Fan-out of coordinator events to any number of subscribers.
/// Unbounded sends keep emission non-blocking from the serialized
/// context; closed receivers are pruned on the next emit.
#[derive(Default)]
pub struct Emitter {
    subs: Mutex<Vec<mpsc::UnboundedSender<DbEvent>>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DbEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.lock().unwrap().push(tx);
        rx
    }

    pub fn emit(&self, event: DbEvent) {
        self.subs
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_to_all_live_subscribers() {
        let emitter = Emitter::new();
        let mut a = emitter.subscribe();
        let b = emitter.subscribe();
        drop(b);
        emitter.emit(DbEvent::Closed {
            address: "x".into(),
        });
        assert!(matches!(a.recv().await, Some(DbEvent::Closed { .. })));
        // Dropped subscriber was pruned.
        assert_eq!(emitter.subs.lock().unwrap().len(), 1);
    }
}
