use bincode::{Decode, Encode};
use uuid::Uuid;

/// Process-local peer identity on the gossip bus.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Encode, Decode)]
#[repr(transparent)]
pub struct PeerId([u8; 16]);

impl PeerId {
    pub fn new() -> Self {
        PeerId(*Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PeerId {
    fn from(u: Uuid) -> Self {
        PeerId(*u.as_bytes())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
