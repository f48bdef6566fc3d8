use serde_json::json;

use super::{create_db, create_opts, keyring, net, wait_for_length};
use crate::database::{Database, OpenOptions};
use crate::error::DbError;
use crate::views::{
    CounterView, DocStoreView, EventLogView, FeedView, KeyValueView, StoreType,
};

#[tokio::test]
async fn event_log_view_folds_in_order() {
    let (store, bus) = net();
    let db = create_db(&store, &bus, "log", StoreType::EventLog).await;
    let view = EventLogView::new(db).unwrap();
    for i in 0..4 {
        view.add(json!(format!("e{i}"))).await.unwrap();
    }
    assert_eq!(view.collect(), vec![json!("e0"), json!("e1"), json!("e2"), json!("e3")]);
}

#[tokio::test]
async fn feed_view_tombstones_by_cid() {
    let (store, bus) = net();
    let db = create_db(&store, &bus, "feed", StoreType::Feed).await;
    let view = FeedView::new(db).unwrap();
    view.add(json!("keep")).await.unwrap();
    let second = view.add(json!("drop")).await.unwrap();
    view.remove(second.cid()).await.unwrap();
    assert_eq!(view.collect(), vec![json!("keep")]);
}

#[tokio::test]
async fn key_value_view_is_last_writer_wins() {
    let (store, bus) = net();
    let db = create_db(&store, &bus, "kv", StoreType::KeyValue).await;
    let view = KeyValueView::new(db).unwrap();
    view.put("color", json!("red")).await.unwrap();
    view.put("color", json!("blue")).await.unwrap();
    view.put("shape", json!("round")).await.unwrap();
    view.del("shape").await.unwrap();
    assert_eq!(view.get("color"), Some(json!("blue")));
    assert_eq!(view.get("shape"), None);
    assert_eq!(view.all().len(), 1);
}

#[tokio::test]
async fn counter_view_sums_increments_across_peers() {
    let (store, bus) = net();
    let keys_a = keyring();
    let keys_b = keyring();
    let pk_a = keys_a.create_key("self").await.public_key_hex().to_string();
    let pk_b = keys_b.create_key("self").await.public_key_hex().to_string();
    let a = Database::open(
        store.clone(),
        bus.clone(),
        keys_a,
        "hits",
        OpenOptions {
            write: vec![pk_a, pk_b],
            ..create_opts(StoreType::Counter)
        },
    )
    .await
    .unwrap();
    let b = Database::open(
        store.clone(),
        bus.clone(),
        keys_b,
        a.address(),
        OpenOptions::default(),
    )
    .await
    .unwrap();
    let mut rx_a = a.subscribe();
    let mut rx_b = b.subscribe();

    let ca = CounterView::new(a.clone()).unwrap();
    let cb = CounterView::new(b.clone()).unwrap();
    ca.inc(3).await.unwrap();
    cb.inc(4).await.unwrap();
    wait_for_length(&a, &mut rx_a, 2).await;
    wait_for_length(&b, &mut rx_b, 2).await;

    assert_eq!(ca.value(), 7);
    assert_eq!(cb.value(), 7);
}

#[tokio::test]
async fn doc_store_view_gets_and_queries() {
    let (store, bus) = net();
    let db = create_db(&store, &bus, "docs", StoreType::DocStore).await;
    let view = DocStoreView::new(db).unwrap();
    view.put("u1", json!({"name": "ada", "admin": true}))
        .await
        .unwrap();
    view.put("u2", json!({"name": "lin", "admin": false}))
        .await
        .unwrap();
    view.put("u1", json!({"name": "ada", "admin": false}))
        .await
        .unwrap();
    view.del("u2").await.unwrap();

    assert_eq!(view.get("u1"), Some(json!({"name": "ada", "admin": false})));
    assert_eq!(view.get("u2"), None);
    assert_eq!(view.query(|d| d["name"] == "ada").len(), 1);
}

#[tokio::test]
async fn concurrent_key_value_writes_converge() {
    let (store, bus) = net();
    let keys_a = keyring();
    let keys_b = keyring();
    let pk_a = keys_a.create_key("self").await.public_key_hex().to_string();
    let pk_b = keys_b.create_key("self").await.public_key_hex().to_string();
    let a = Database::open(
        store.clone(),
        bus.clone(),
        keys_a,
        "settings",
        OpenOptions {
            write: vec![pk_a, pk_b],
            ..create_opts(StoreType::KeyValue)
        },
    )
    .await
    .unwrap();
    let b = Database::open(
        store.clone(),
        bus.clone(),
        keys_b,
        a.address(),
        OpenOptions::default(),
    )
    .await
    .unwrap();
    let mut rx_a = a.subscribe();
    let mut rx_b = b.subscribe();

    let va = KeyValueView::new(a.clone()).unwrap();
    let vb = KeyValueView::new(b.clone()).unwrap();
    // Whether the writes land concurrently or causally ordered, both
    // replicas resolve the key identically.
    va.put("k", json!("from-a")).await.unwrap();
    vb.put("k", json!("from-b")).await.unwrap();
    wait_for_length(&a, &mut rx_a, 2).await;
    wait_for_length(&b, &mut rx_b, 2).await;

    let winner_a = va.get("k").unwrap();
    let winner_b = vb.get("k").unwrap();
    assert_eq!(winner_a, winner_b);
}

#[tokio::test]
async fn views_reject_the_wrong_store_type() {
    let (store, bus) = net();
    let db = create_db(&store, &bus, "kv", StoreType::KeyValue).await;
    assert!(matches!(
        EventLogView::new(db.clone()),
        Err(DbError::TypeMismatch { .. })
    ));
    assert!(KeyValueView::new(db).is_ok());
}
