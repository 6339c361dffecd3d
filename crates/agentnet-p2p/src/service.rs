use async_trait::async_trait;

use agentnet_core::types::{AgentId, Amount};

use crate::conversation::ConversationTurn;

/// What the responder knows about the thread a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub conversation_id: String,
    /// Author of the message being responded to.
    pub peer: AgentId,
    /// Earlier turns, oldest first, including the message itself.
    pub history: Vec<ConversationTurn>,
}

/// Turns message text into reply text (typically an LLM).
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, text: &str, context: &ConversationContext) -> anyhow::Result<String>;
}

/// Pays rewards. Returns the transaction id on success.
#[async_trait]
pub trait TokenTransfer: Send + Sync {
    async fn transfer(&self, to: &AgentId, amount: Amount) -> anyhow::Result<String>;
}
