use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::message::InboundMessage;

/// Result of binding a transport to a local port.
pub struct Listening {
    /// Addresses peers can dial to reach us; carried in announcements.
    pub addresses: Vec<String>,
    /// Messages arriving on subscribed topics.
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Publish/subscribe transport with peer dialing.
///
/// Implementations own connection management; the protocol layer only
/// decides what to publish and whom to dial.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind to `port` (0 = any) and hand over the inbound stream.
    /// May only succeed once per transport.
    async fn listen(&self, port: u16) -> Result<Listening, TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), TransportError>;

    /// Resolve once the connection is established or has failed.
    async fn dial(&self, address: &str) -> Result<(), TransportError>;

    /// Release every connection and stop delivering inbound messages.
    async fn shutdown(&self);
}
