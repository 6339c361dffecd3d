use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agentnet_core::Envelope;
use tracing::debug;

use crate::codec::MessageCodec;
use crate::error::NetError;
use crate::message::topic_for;
use crate::transport::Transport;

/// Seals and publishes envelopes for a live session.
///
/// Once the session is closed every publish fails with
/// [`NetError::NotRunning`], which is how late handler results get dropped.
#[derive(Clone)]
pub struct Outbox {
    codec: MessageCodec,
    transport: Arc<dyn Transport>,
    live: Arc<AtomicBool>,
}

impl Outbox {
    pub fn new(codec: MessageCodec, transport: Arc<dyn Transport>) -> Self {
        Self {
            codec,
            transport,
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn open(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Sign `draft` as the local agent and publish it on its kind's topic.
    pub async fn send(&self, draft: Envelope) -> Result<Envelope, NetError> {
        if !self.is_live() {
            return Err(NetError::NotRunning);
        }
        let envelope = self.codec.seal(draft)?;
        let data = self.codec.encode(&envelope)?;
        let topic = topic_for(envelope.kind);
        self.transport.publish(topic, data).await?;
        debug!(
            id = %envelope.message_id,
            kind = %envelope.kind,
            topic,
            "published envelope"
        );
        Ok(envelope)
    }
}
