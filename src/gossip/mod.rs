pub mod inmem;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::peer_id::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipError {
    /// Target peer is not in the topic.
    UnknownPeer(PeerId),
    /// The subscription or the bus is gone.
    Closed,
    Io(String),
}

impl std::fmt::Display for GossipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GossipError::UnknownPeer(p) => write!(f, "unknown peer {}", p),
            GossipError::Closed => write!(f, "topic closed"),
            GossipError::Io(e) => write!(f, "gossip io: {}", e),
        }
    }
}

impl std::error::Error for GossipError {}

/// Notifications delivered to a topic subscriber's inbox.
#[derive(Clone, Debug)]
pub enum GossipEvent {
    Message { from: PeerId, payload: Vec<u8> },
    PeerJoined { peer: PeerId },
}

/// Per-topic pub/sub bus shared by every coordinator in a process.
/// Delivery is best-effort; subscribers receive peer-join notifications
/// for the topic they are in.
#[async_trait]
pub trait GossipBus: Send + Sync {
    /// Join `topic` as `local`, delivering notifications to `inbox`.
    /// The returned room handle is the only way to talk to the topic;
    /// the bus itself never calls back into the subscriber.
    async fn subscribe(
        &self,
        topic: &str,
        local: PeerId,
        inbox: mpsc::Sender<GossipEvent>,
    ) -> Result<Arc<dyn TopicRoom>, GossipError>;
}

#[async_trait]
pub trait TopicRoom: Send + Sync {
    /// Best-effort broadcast to every other member of the topic.
    async fn publish(&self, payload: Vec<u8>) -> Result<(), GossipError>;

    /// Direct message to one peer currently in the topic.
    async fn send_to(&self, peer: PeerId, payload: Vec<u8>) -> Result<(), GossipError>;

    /// Leave the topic. Idempotent.
    async fn leave(&self);
}
