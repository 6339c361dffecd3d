use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAX_ENVELOPE_BYTES;
use crate::error::ProtocolError;
use crate::types::{now_millis, AgentId, Amount, MessageId, Timestamp};

/// What an envelope asks of its receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Broadcast,
    Question,
    Answer,
    Announcement,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Broadcast => "broadcast",
            MessageKind::Question => "question",
            MessageKind::Answer => "answer",
            MessageKind::Announcement => "announcement",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed, typed message unit exchanged between agents.
///
/// `signature` covers every other field via [`Envelope::signing_bytes`].
/// Unknown JSON fields are ignored on decode so newer peers can extend the
/// wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_id: MessageId,
    pub from_agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_agent_id: Option<AgentId>,
    pub content: String,
    pub timestamp: Timestamp,
    /// Hex-encoded detached Ed25519 signature.
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_amount: Option<Amount>,
}

impl Envelope {
    /// Start an unsigned envelope with a fresh id and the current time.
    pub fn draft(kind: MessageKind, from: AgentId, content: impl Into<String>) -> Self {
        Self {
            message_id: MessageId::new(),
            from_agent_id: from,
            to_agent_id: None,
            content: content.into(),
            timestamp: now_millis(),
            signature: String::new(),
            conversation_id: None,
            reply_to: None,
            kind,
            reward_amount: None,
        }
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.message_id = id;
        self
    }

    pub fn to(mut self, agent: AgentId) -> Self {
        self.to_agent_id = Some(agent);
        self
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn replying_to(mut self, id: MessageId) -> Self {
        self.reply_to = Some(id);
        self
    }

    pub fn with_reward(mut self, amount: Amount) -> Self {
        self.reward_amount = Some(amount);
        self
    }

    /// Thread key: the explicit conversation id, or this message's own id
    /// when it opens a new thread.
    pub fn conversation_key(&self) -> String {
        self.conversation_id
            .clone()
            .unwrap_or_else(|| self.message_id.to_string())
    }

    /// Canonical bytes covered by the signature.
    ///
    /// A JSON object with keys sorted lexicographically and no whitespace.
    /// Absent optional fields are written as `null`, so adding or removing
    /// one changes the payload just like editing a value does.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut fields: BTreeMap<&'static str, Value> = BTreeMap::new();
        fields.insert("messageId", Value::from(self.message_id.as_str()));
        fields.insert("fromAgentId", Value::from(self.from_agent_id.as_str()));
        fields.insert(
            "toAgentId",
            self.to_agent_id.as_ref().map_or(Value::Null, |a| Value::from(a.as_str())),
        );
        fields.insert("content", Value::from(self.content.as_str()));
        fields.insert("timestamp", Value::from(self.timestamp));
        fields.insert(
            "conversationId",
            self.conversation_id.as_deref().map_or(Value::Null, Value::from),
        );
        fields.insert(
            "replyTo",
            self.reply_to.as_ref().map_or(Value::Null, |m| Value::from(m.as_str())),
        );
        fields.insert("kind", Value::from(self.kind.as_str()));
        fields.insert("rewardAmount", self.reward_amount.map_or(Value::Null, Value::from));
        serde_json::to_vec(&fields).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize from wire bytes, enforcing the size limit first.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_ENVELOPE_BYTES {
            return Err(ProtocolError::EnvelopeTooLarge {
                size: data.len(),
                limit: MAX_ENVELOPE_BYTES,
            });
        }
        let envelope: Self =
            serde_json::from_slice(data).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        if envelope.signature.is_empty() {
            return Err(ProtocolError::MissingField("signature"));
        }
        Ok(envelope)
    }
}
