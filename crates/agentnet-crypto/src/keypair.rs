use agentnet_core::types::AgentId;
use ed25519_dalek::{Signer as _, SigningKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::signing::{SignatureError, Signer};

/// An agent keypair: Ed25519 signing key with its derived [`AgentId`].
pub struct KeyPair {
    agent_id: AgentId,
    signing_key: SigningKey,
}

/// On-disk form of a keypair. The secret is wiped from memory on drop.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredKey {
    #[zeroize(skip)]
    pub agent_id: AgentId,
    /// Hex-encoded 32-byte Ed25519 seed.
    pub secret_key: String,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Restore from a raw 32-byte seed.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let agent_id = AgentId::from_key_bytes(signing_key.verifying_key().as_bytes());
        Self { agent_id, signing_key }
    }

    /// Copy of the secret seed, wiped when the wrapper drops.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub fn to_stored(&self) -> StoredKey {
        StoredKey {
            agent_id: self.agent_id.clone(),
            secret_key: hex::encode(*self.secret_bytes()),
        }
    }

    /// Restore from a [`StoredKey`], checking the recorded address matches.
    pub fn from_stored(stored: &StoredKey) -> Result<Self, SignatureError> {
        let raw = Zeroizing::new(
            hex::decode(&stored.secret_key)
                .map_err(|e| SignatureError::InvalidSigner(e.to_string()))?,
        );
        let seed: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            SignatureError::InvalidSigner(format!("expected 32 seed bytes, got {}", raw.len()))
        })?;
        let kp = Self::from_secret_bytes(&seed);
        if kp.agent_id != stored.agent_id {
            return Err(SignatureError::InvalidSigner(format!(
                "key file records {} but seed derives {}",
                stored.agent_id, kp.agent_id
            )));
        }
        Ok(kp)
    }
}

impl Signer for KeyPair {
    fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ agent_id: {:?} }}", self.agent_id)
    }
}
