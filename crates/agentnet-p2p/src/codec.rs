use std::sync::Arc;

use agentnet_core::types::AgentId;
use agentnet_core::{Announcement, Envelope, MessageKind, ProtocolError};
use agentnet_crypto::{verify_signature, Signer};

use crate::error::CodecError;

/// Encodes, decodes, signs and verifies envelopes for one local identity.
#[derive(Clone)]
pub struct MessageCodec {
    signer: Arc<dyn Signer>,
}

impl MessageCodec {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }

    pub fn agent_id(&self) -> &AgentId {
        self.signer.agent_id()
    }

    /// Sign canonical bytes with the local key.
    pub fn sign(&self, signing_bytes: &[u8]) -> String {
        self.signer.sign(signing_bytes)
    }

    /// Stamp the local identity as sender and sign.
    pub fn seal(&self, mut envelope: Envelope) -> Result<Envelope, ProtocolError> {
        envelope.from_agent_id = self.signer.agent_id().clone();
        envelope.signature = self.sign(&envelope.signing_bytes()?);
        Ok(envelope)
    }

    /// Check the envelope signature against its claimed sender.
    pub fn verify(&self, envelope: &Envelope) -> Result<(), CodecError> {
        verify_signature(
            &envelope.from_agent_id,
            &envelope.signing_bytes()?,
            &envelope.signature,
        )?;
        Ok(())
    }

    /// Sign an announcement with the local key.
    pub fn seal_announcement(
        &self,
        mut announcement: Announcement,
    ) -> Result<Announcement, ProtocolError> {
        announcement.agent_id = self.signer.agent_id().clone();
        announcement.signature = self.sign(&announcement.signing_bytes()?);
        Ok(announcement)
    }

    /// Check an announcement's own signature and that it matches the
    /// envelope that carried it.
    pub fn verify_announcement(
        &self,
        carrier: &Envelope,
        announcement: &Announcement,
    ) -> Result<(), CodecError> {
        if carrier.kind != MessageKind::Announcement {
            return Err(ProtocolError::UnexpectedKind {
                expected: "announcement",
                got: carrier.kind.to_string(),
            }
            .into());
        }
        if announcement.agent_id != carrier.from_agent_id {
            return Err(ProtocolError::SenderMismatch {
                announced: announcement.agent_id.to_string(),
                sender: carrier.from_agent_id.to_string(),
            }
            .into());
        }
        verify_signature(
            &announcement.agent_id,
            &announcement.signing_bytes()?,
            &announcement.signature,
        )?;
        Ok(())
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
        envelope.to_bytes()
    }

    /// Decode and verify in one step; nothing unverified leaves the codec.
    pub fn open(&self, data: &[u8]) -> Result<Envelope, CodecError> {
        let envelope = Envelope::from_bytes(data)?;
        self.verify(&envelope)?;
        Ok(envelope)
    }
}
