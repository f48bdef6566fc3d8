pub mod views_test;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use crate::database::{Database, OpenOptions};
use crate::events::DbEvent;
use crate::gossip::{inmem::InMemGossip, GossipBus};
use crate::keystore::{KeyStore, MemoryKeyStore};
use crate::objectstore::{inmem::MemoryObjectStore, ObjectStore};
use crate::views::StoreType;

/// Shared object store + gossip bus standing in for the network.
pub fn net() -> (Arc<dyn ObjectStore>, Arc<dyn GossipBus>) {
    (
        Arc::new(MemoryObjectStore::new()),
        Arc::new(InMemGossip::new()),
    )
}

pub fn keyring() -> Arc<dyn KeyStore> {
    Arc::new(MemoryKeyStore::new())
}

pub fn create_opts(store_type: StoreType) -> OpenOptions {
    OpenOptions {
        create: true,
        store_type: Some(store_type),
        ..OpenOptions::default()
    }
}

/// Create a fresh database named `name` owned by a fresh keyring.
pub async fn create_db(
    store: &Arc<dyn ObjectStore>,
    bus: &Arc<dyn GossipBus>,
    name: &str,
    store_type: StoreType,
) -> Arc<Database> {
    Database::open(
        store.clone(),
        bus.clone(),
        keyring(),
        name,
        create_opts(store_type),
    )
    .await
    .unwrap()
}

/// Open an existing database address with its own keyring.
pub async fn open_replica(
    store: &Arc<dyn ObjectStore>,
    bus: &Arc<dyn GossipBus>,
    address: &str,
) -> Arc<Database> {
    Database::open(
        store.clone(),
        bus.clone(),
        keyring(),
        address,
        OpenOptions::default(),
    )
    .await
    .unwrap()
}

pub fn value_payload(s: impl Into<String>) -> serde_json::Value {
    json!({ "value": s.into() })
}

/// Drive `rx` until `db` holds `n` entries, or panic after 10s.
pub async fn wait_for_length(
    db: &Arc<Database>,
    rx: &mut mpsc::UnboundedReceiver<DbEvent>,
    n: usize,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while db.len() < n {
            if rx.recv().await.is_none() {
                panic!("event channel closed before {n} entries arrived");
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {n} entries, have {}", db.len()));
}
