use agentnet_core::ProtocolError;
use agentnet_crypto::SignatureError;
use thiserror::Error;

/// Failures reported by a [`crate::Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("peer unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("listen failed: {0}")]
    Listen(String),

    #[error("transport is already listening")]
    AlreadyListening,

    #[error("subscription to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("no peers subscribed to {0}")]
    NoPeers(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("transport closed")]
    Closed,
}

/// Why an inbound envelope was rejected by the codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Errors surfaced to callers of [`crate::NetworkFacade`].
#[derive(Debug, Error)]
pub enum NetError {
    #[error("network session is not running")]
    NotRunning,

    #[error("network session was stopped; create a new facade to reconnect")]
    Stopped,

    #[error("cannot address a message to ourselves")]
    SelfAddressed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<ProtocolError> for NetError {
    fn from(e: ProtocolError) -> Self {
        NetError::Codec(CodecError::Protocol(e))
    }
}
