use agentnet_core::types::AgentId;
use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("invalid signer address: {0}")]
    InvalidSigner(String),
}

/// Signing identity used to seal outbound envelopes.
///
/// Signatures are hex-encoded detached Ed25519 signatures; `agent_id` is the
/// address peers verify them against.
pub trait Signer: Send + Sync {
    fn agent_id(&self) -> &AgentId;

    fn sign(&self, message: &[u8]) -> String;
}

/// Verify a hex-encoded detached signature against the signer's address.
pub fn verify_signature(
    signer: &AgentId,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), SignatureError> {
    let key_bytes = signer
        .key_bytes()
        .map_err(|e| SignatureError::InvalidSigner(e.to_string()))?;
    let vk = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| SignatureError::InvalidSigner(e.to_string()))?;

    let raw = hex::decode(signature_hex)
        .map_err(|e| SignatureError::MalformedSignature(e.to_string()))?;
    let sig_bytes: [u8; 64] = raw.try_into().map_err(|b: Vec<u8>| {
        SignatureError::MalformedSignature(format!("expected 64 bytes, got {}", b.len()))
    })?;
    let sig = Signature::from_bytes(&sig_bytes);

    vk.verify_strict(message, &sig)
        .map_err(|_| SignatureError::InvalidSignature)
}
