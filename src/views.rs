use std::collections::BTreeMap;
use std::sync::Arc;

use cid::Cid;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::{Database, IterOptions};
use crate::entry::Entry;
use crate::error::DbError;

/// The known store types, as spelled in manifests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreType {
    #[serde(rename = "eventlog")]
    EventLog,
    #[serde(rename = "feed")]
    Feed,
    #[serde(rename = "keyvalue")]
    KeyValue,
    #[serde(rename = "counter")]
    Counter,
    #[serde(rename = "docstore")]
    DocStore,
}

impl StoreType {
    pub const ALL: [StoreType; 5] = [
        StoreType::EventLog,
        StoreType::Feed,
        StoreType::KeyValue,
        StoreType::Counter,
        StoreType::DocStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::EventLog => "eventlog",
            StoreType::Feed => "feed",
            StoreType::KeyValue => "keyvalue",
            StoreType::Counter => "counter",
            StoreType::DocStore => "docstore",
        }
    }

    pub fn parse(s: &str) -> Result<StoreType, DbError> {
        Self::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| DbError::InvalidType(s.to_string()))
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const OP_ADD: &str = "ADD";
pub const OP_PUT: &str = "PUT";
pub const OP_DEL: &str = "DEL";
pub const OP_COUNTER_ADD: &str = "COUNTER.ADD";

/// Canonical operation payload wrapped by every typed view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpPayload {
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Value>,
}

impl OpPayload {
    pub fn new(op: &str, key: Option<String>, value: Option<Value>) -> Value {
        serde_json::to_value(OpPayload {
            op: op.to_string(),
            key,
            value,
        })
        .expect("op payload always serializes")
    }

    /// Entries whose payload is not an operation are ignored by views.
    pub fn of(entry: &Entry) -> Option<OpPayload> {
        serde_json::from_value(entry.payload().clone()).ok()
    }
}

fn expect_type(db: &Database, want: StoreType) -> Result<(), DbError> {
    if db.store_type() == want {
        Ok(())
    } else {
        Err(DbError::TypeMismatch {
            expected: want.to_string(),
            found: db.store_type().to_string(),
        })
    }
}

/// Ordered, append-only values.
pub struct EventLogView {
    db: Arc<Database>,
}

impl EventLogView {
    pub fn new(db: Arc<Database>) -> Result<Self, DbError> {
        expect_type(&db, StoreType::EventLog)?;
        Ok(Self { db })
    }

    pub async fn add(&self, value: Value) -> Result<Entry, DbError> {
        self.db.add(OpPayload::new(OP_ADD, None, Some(value))).await
    }

    pub fn collect(&self) -> Vec<Value> {
        self.db
            .iterator(IterOptions::all())
            .iter()
            .filter_map(|e| OpPayload::of(e))
            .filter(|p| p.op == OP_ADD)
            .filter_map(|p| p.value)
            .collect()
    }
}

/// Like the event log, but entries can be tombstoned by CID.
pub struct FeedView {
    db: Arc<Database>,
}

impl FeedView {
    pub fn new(db: Arc<Database>) -> Result<Self, DbError> {
        expect_type(&db, StoreType::Feed)?;
        Ok(Self { db })
    }

    pub async fn add(&self, value: Value) -> Result<Entry, DbError> {
        self.db.add(OpPayload::new(OP_ADD, None, Some(value))).await
    }

    pub async fn remove(&self, cid: &Cid) -> Result<Entry, DbError> {
        self.db
            .add(OpPayload::new(OP_DEL, Some(cid.to_string()), None))
            .await
    }

    pub fn collect(&self) -> Vec<Value> {
        let entries = self.db.iterator(IterOptions::all());
        let mut removed = std::collections::HashSet::new();
        for e in &entries {
            if let Some(p) = OpPayload::of(e) {
                if p.op == OP_DEL {
                    if let Some(k) = p.key {
                        removed.insert(k);
                    }
                }
            }
        }
        entries
            .iter()
            .filter(|e| !removed.contains(&e.cid().to_string()))
            .filter_map(|e| OpPayload::of(e).filter(|p| p.op == OP_ADD).and_then(|p| p.value))
            .collect()
    }
}

/// Last-writer-wins map keyed by string, resolved by the log's total order.
pub struct KeyValueView {
    db: Arc<Database>,
}

impl KeyValueView {
    pub fn new(db: Arc<Database>) -> Result<Self, DbError> {
        expect_type(&db, StoreType::KeyValue)?;
        Ok(Self { db })
    }

    pub async fn put(&self, key: &str, value: Value) -> Result<Entry, DbError> {
        self.db
            .add(OpPayload::new(OP_PUT, Some(key.to_string()), Some(value)))
            .await
    }

    pub async fn del(&self, key: &str) -> Result<Entry, DbError> {
        self.db
            .add(OpPayload::new(OP_DEL, Some(key.to_string()), None))
            .await
    }

    pub fn all(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for e in self.db.iterator(IterOptions::all()) {
            let Some(p) = OpPayload::of(&e) else { continue };
            let Some(key) = p.key else { continue };
            match p.op.as_str() {
                OP_PUT => {
                    if let Some(v) = p.value {
                        out.insert(key, v);
                    }
                }
                OP_DEL => {
                    out.remove(&key);
                }
                _ => {}
            }
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.all().remove(key)
    }
}

/// Grow-only counter summing `COUNTER.ADD` amounts.
pub struct CounterView {
    db: Arc<Database>,
}

impl CounterView {
    pub fn new(db: Arc<Database>) -> Result<Self, DbError> {
        expect_type(&db, StoreType::Counter)?;
        Ok(Self { db })
    }

    pub async fn inc(&self, amount: u64) -> Result<Entry, DbError> {
        self.db
            .add(OpPayload::new(OP_COUNTER_ADD, None, Some(Value::from(amount))))
            .await
    }

    pub fn value(&self) -> u64 {
        self.db
            .iterator(IterOptions::all())
            .iter()
            .filter_map(|e| OpPayload::of(e))
            .filter(|p| p.op == OP_COUNTER_ADD)
            .filter_map(|p| p.value.and_then(|v| v.as_u64()))
            .sum()
    }
}

/// Document store: last PUT per key wins, DEL removes.
pub struct DocStoreView {
    db: Arc<Database>,
}

impl DocStoreView {
    pub fn new(db: Arc<Database>) -> Result<Self, DbError> {
        expect_type(&db, StoreType::DocStore)?;
        Ok(Self { db })
    }

    pub async fn put(&self, key: &str, doc: Value) -> Result<Entry, DbError> {
        self.db
            .add(OpPayload::new(OP_PUT, Some(key.to_string()), Some(doc)))
            .await
    }

    pub async fn del(&self, key: &str) -> Result<Entry, DbError> {
        self.db
            .add(OpPayload::new(OP_DEL, Some(key.to_string()), None))
            .await
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.docs().remove(key)
    }

    pub fn query(&self, pred: impl Fn(&Value) -> bool) -> Vec<Value> {
        self.docs().into_values().filter(|d| pred(d)).collect()
    }

    fn docs(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for e in self.db.iterator(IterOptions::all()) {
            let Some(p) = OpPayload::of(&e) else { continue };
            let Some(key) = p.key else { continue };
            match p.op.as_str() {
                OP_PUT => {
                    if let Some(v) = p.value {
                        out.insert(key, v);
                    }
                }
                OP_DEL => {
                    out.remove(&key);
                }
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_type_strings_round_trip() {
        for t in StoreType::ALL {
            assert_eq!(StoreType::parse(t.as_str()).unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!(matches!(
            StoreType::parse("graph"),
            Err(DbError::InvalidType(_))
        ));
    }

    #[test]
    fn op_payload_round_trips() {
        let v = OpPayload::new(OP_PUT, Some("k".into()), Some(Value::from(7)));
        let p: OpPayload = serde_json::from_value(v).unwrap();
        assert_eq!(p.op, OP_PUT);
        assert_eq!(p.key.as_deref(), Some("k"));
        assert_eq!(p.value, Some(Value::from(7)));
    }
}
