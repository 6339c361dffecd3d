use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    // ── Wire format ──────────────────────────────────────────────────────────
    #[error("envelope too large: {size} bytes exceeds {limit}")]
    EnvelopeTooLarge { size: usize, limit: usize },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    // ── Identity ─────────────────────────────────────────────────────────────
    #[error("invalid agent id: {0}")]
    InvalidAgentId(String),

    #[error("announcement agent {announced} does not match envelope sender {sender}")]
    SenderMismatch { announced: String, sender: String },

    #[error("expected a {expected} envelope, got {got}")]
    UnexpectedKind { expected: &'static str, got: String },
}
