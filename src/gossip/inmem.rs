use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::{GossipBus, GossipError, GossipEvent, TopicRoom};
use crate::peer_id::PeerId;

type Members = HashMap<PeerId, mpsc::Sender<GossipEvent>>;

#[derive(Default)]
struct Registry {
    topics: RwLock<HashMap<String, Members>>,
}

/// In-process gossip bus. One instance is shared (via `Arc`) by every
/// coordinator that should see each other, standing in for a real
/// pub/sub network in tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemGossip {
    registry: Arc<Registry>,
}

impl InMemGossip {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GossipBus for InMemGossip {
    async fn subscribe(
        &self,
        topic: &str,
        local: PeerId,
        inbox: mpsc::Sender<GossipEvent>,
    ) -> Result<Arc<dyn TopicRoom>, GossipError> {
        let existing: Vec<(PeerId, mpsc::Sender<GossipEvent>)> = {
            let mut topics = self.registry.topics.write().await;
            let members = topics.entry(topic.to_string()).or_default();
            let existing = members
                .iter()
                .map(|(p, tx)| (*p, tx.clone()))
                .collect();
            members.insert(local, inbox.clone());
            existing
        };

        // Join notifications flow both ways: members learn about the
        // newcomer, the newcomer learns about each member.
        for (peer, tx) in existing {
            let _ = tx.send(GossipEvent::PeerJoined { peer: local }).await;
            let _ = inbox.send(GossipEvent::PeerJoined { peer }).await;
        }

        Ok(Arc::new(InMemRoom {
            registry: self.registry.clone(),
            topic: topic.to_string(),
            local,
        }))
    }
}

struct InMemRoom {
    registry: Arc<Registry>,
    topic: String,
    local: PeerId,
}

#[async_trait]
impl TopicRoom for InMemRoom {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), GossipError> {
        let others: Vec<mpsc::Sender<GossipEvent>> = {
            let topics = self.registry.topics.read().await;
            let Some(members) = topics.get(&self.topic) else {
                return Err(GossipError::Closed);
            };
            members
                .iter()
                .filter(|(p, _)| **p != self.local)
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in others {
            // Best-effort; a full or closed inbox is the receiver's loss.
            if tx
                .send(GossipEvent::Message {
                    from: self.local,
                    payload: payload.clone(),
                })
                .await
                .is_err()
            {
                debug!(topic = %self.topic, "gossip: dropped publish to dead member");
            }
        }
        Ok(())
    }

    async fn send_to(&self, peer: PeerId, payload: Vec<u8>) -> Result<(), GossipError> {
        let tx = {
            let topics = self.registry.topics.read().await;
            topics
                .get(&self.topic)
                .and_then(|m| m.get(&peer).cloned())
                .ok_or(GossipError::UnknownPeer(peer))?
        };
        tx.send(GossipEvent::Message {
            from: self.local,
            payload,
        })
        .await
        .map_err(|_| GossipError::UnknownPeer(peer))
    }

    async fn leave(&self) {
        let mut topics = self.registry.topics.write().await;
        if let Some(members) = topics.get_mut(&self.topic) {
            members.remove(&self.local);
            if members.is_empty() {
                topics.remove(&self.topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(x: u8) -> PeerId {
        let mut b = [0u8; 16];
        b[0] = x;
        PeerId::from_bytes(b)
    }

    #[tokio::test]
    async fn join_notifies_both_sides() {
        let bus = InMemGossip::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let _a = bus.subscribe("t", pid(1), tx_a).await.unwrap();
        let _b = bus.subscribe("t", pid(2), tx_b).await.unwrap();

        match rx_a.recv().await.unwrap() {
            GossipEvent::PeerJoined { peer } => assert_eq!(peer, pid(2)),
            other => panic!("unexpected {other:?}"),
        }
        match rx_b.recv().await.unwrap() {
            GossipEvent::PeerJoined { peer } => assert_eq!(peer, pid(1)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_reaches_everyone_but_the_sender() {
        let bus = InMemGossip::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let room_a = bus.subscribe("t", pid(1), tx_a).await.unwrap();
        let _room_b = bus.subscribe("t", pid(2), tx_b).await.unwrap();
        rx_a.recv().await.unwrap(); // join notice
        rx_b.recv().await.unwrap();

        room_a.publish(b"heads".to_vec()).await.unwrap();
        match rx_b.recv().await.unwrap() {
            GossipEvent::Message { from, payload } => {
                assert_eq!(from, pid(1));
                assert_eq!(payload, b"heads");
            }
            other => panic!("unexpected {other:?}"),
        }
        // Sender must not hear its own publish.
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_targets_one_member() {
        let bus = InMemGossip::new();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let room_a = bus.subscribe("t", pid(1), tx_a).await.unwrap();
        let _room_b = bus.subscribe("t", pid(2), tx_b).await.unwrap();
        rx_b.recv().await.unwrap(); // join notice

        room_a.send_to(pid(2), b"direct".to_vec()).await.unwrap();
        match rx_b.recv().await.unwrap() {
            GossipEvent::Message { payload, .. } => assert_eq!(payload, b"direct"),
            other => panic!("unexpected {other:?}"),
        }

        let err = room_a.send_to(pid(9), vec![]).await.unwrap_err();
        assert_eq!(err, GossipError::UnknownPeer(pid(9)));
    }

    #[tokio::test]
    async fn leave_removes_membership() {
        let bus = InMemGossip::new();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let room_a = bus.subscribe("t", pid(1), tx_a).await.unwrap();
        let room_b = bus.subscribe("t", pid(2), tx_b).await.unwrap();
        rx_b.recv().await.unwrap();

        room_b.leave().await;
        room_b.leave().await; // idempotent
        let err = room_a.send_to(pid(2), vec![]).await.unwrap_err();
        assert_eq!(err, GossipError::UnknownPeer(pid(2)));
    }
}
