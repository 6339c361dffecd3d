use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;

/// Milliseconds since the Unix epoch (UTC).
pub type Timestamp = u64;

/// Reward denominated in the token's smallest unit.
pub type Amount = u64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

// ── AgentId ──────────────────────────────────────────────────────────────────

/// An agent's address: base-58 encoded 32-byte Ed25519 verifying key.
///
/// Because the address *is* the public key, any peer can check a signature
/// against the claimed sender without a key directory.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn from_key_bytes(key: &[u8; 32]) -> Self {
        Self(bs58::encode(key).into_string())
    }

    /// Parse and validate a base-58 address.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let id = Self(s.to_string());
        id.key_bytes()?;
        Ok(id)
    }

    /// Decode the embedded verifying key bytes.
    pub fn key_bytes(&self) -> Result<[u8; 32], ProtocolError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| ProtocolError::InvalidAgentId(e.to_string()))?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            ProtocolError::InvalidAgentId(format!("expected 32 key bytes, got {}", b.len()))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", self.short())
    }
}

// ── MessageId ────────────────────────────────────────────────────────────────

/// Globally unique envelope identifier (UUID v4 string on the wire).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}
