use agentnet_core::constants::{ANNOUNCE_TOPIC, MESSAGE_TOPIC};
use agentnet_core::envelope::MessageKind;

/// A payload delivered by the transport on one of the subscribed topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub data: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, data: Vec<u8>) -> Self {
        Self { topic: topic.into(), data }
    }
}

/// Every topic an agent subscribes to.
pub const TOPICS: [&str; 2] = [ANNOUNCE_TOPIC, MESSAGE_TOPIC];

/// Topic an envelope of the given kind is published on.
pub fn topic_for(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Announcement => ANNOUNCE_TOPIC,
        _ => MESSAGE_TOPIC,
    }
}
