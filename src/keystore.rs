use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::DbError;

/// Long-lived ed25519 signing key. Public keys travel as lowercase hex.
pub struct Keypair {
    signing: SigningKey,
    public_hex: String,
}

impl Keypair {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let public_hex = hex::encode(signing.verifying_key().as_bytes());
        Self { signing, public_hex }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let public_hex = hex::encode(signing.verifying_key().as_bytes());
        Self { signing, public_hex }
    }

    pub fn public_key_hex(&self) -> &str {
        &self.public_hex
    }

    /// Signature over `bytes`, hex-encoded.
    pub fn sign_hex(&self, bytes: &[u8]) -> String {
        hex::encode(self.signing.sign(bytes).to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public_hex)
            .finish()
    }
}

/// Verify a hex signature made by `public_hex` over `bytes`.
pub fn verify_hex_signature(public_hex: &str, bytes: &[u8], sig_hex: &str) -> Result<(), DbError> {
    let pk_bytes: [u8; 32] = hex::decode(public_hex)
        .map_err(|e| DbError::MalformedEntry(format!("bad public key hex: {e}")))?
        .try_into()
        .map_err(|_| DbError::MalformedEntry("public key is not 32 bytes".into()))?;
    let vk = VerifyingKey::from_bytes(&pk_bytes)
        .map_err(|e| DbError::MalformedEntry(format!("bad public key: {e}")))?;
    let sig_bytes = hex::decode(sig_hex)
        .map_err(|e| DbError::MalformedEntry(format!("bad signature hex: {e}")))?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| DbError::MalformedEntry(format!("bad signature: {e}")))?;
    vk.verify(bytes, &sig)
        .map_err(|_| DbError::InvalidEntry("signature does not verify".into()))
}

/// Named key storage. Keys are created on demand and live for the process
/// (or longer, for persistent implementations).
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_key(&self, id: &str) -> Option<Arc<Keypair>>;
    async fn create_key(&self, id: &str) -> Arc<Keypair>;
}

#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Arc<Keypair>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_key(&self, id: &str) -> Option<Arc<Keypair>> {
        self.keys.read().unwrap().get(id).cloned()
    }

    async fn create_key(&self, id: &str) -> Arc<Keypair> {
        let mut g = self.keys.write().unwrap();
        g.entry(id.to_string())
            .or_insert_with(|| Arc::new(Keypair::generate()))
            .clone()
    }
}
