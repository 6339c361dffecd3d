use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use agentnet_core::constants::{MAX_CONVERSATIONS, MAX_TURNS_PER_CONVERSATION};
use agentnet_core::types::{AgentId, MessageId, Timestamp};
use agentnet_core::{Envelope, MessageKind};
use tokio::time::Instant;

/// One message in a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub message_id: MessageId,
    pub author: AgentId,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: Timestamp,
}

impl From<&Envelope> for ConversationTurn {
    fn from(env: &Envelope) -> Self {
        Self {
            message_id: env.message_id.clone(),
            author: env.from_agent_id.clone(),
            kind: env.kind,
            content: env.content.clone(),
            timestamp: env.timestamp,
        }
    }
}

struct Thread {
    turns: VecDeque<ConversationTurn>,
    updated: Instant,
}

/// Recent history per conversation, handed to the responder as context.
pub struct ConversationLog {
    threads: Mutex<HashMap<String, Thread>>,
    ttl: Duration,
}

impl ConversationLog {
    pub fn new(ttl: Duration) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn record(&self, conversation_id: &str, turn: ConversationTurn) {
        self.record_at(conversation_id, turn, Instant::now());
    }

    pub fn record_at(&self, conversation_id: &str, turn: ConversationTurn, now: Instant) {
        let mut threads = self.threads.lock().unwrap_or_else(|p| p.into_inner());
        if !threads.contains_key(conversation_id) && threads.len() >= MAX_CONVERSATIONS {
            let stalest = threads
                .iter()
                .min_by_key(|(_, t)| t.updated)
                .map(|(k, _)| k.clone());
            if let Some(key) = stalest {
                threads.remove(&key);
            }
        }
        let thread = threads
            .entry(conversation_id.to_string())
            .or_insert_with(|| Thread { turns: VecDeque::new(), updated: now });
        if thread.turns.iter().any(|t| t.message_id == turn.message_id) {
            return;
        }
        thread.turns.push_back(turn);
        while thread.turns.len() > MAX_TURNS_PER_CONVERSATION {
            thread.turns.pop_front();
        }
        thread.updated = now;
    }

    /// Turns recorded for `conversation_id`, oldest first.
    pub fn context(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        self.threads
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(conversation_id)
            .map(|t| t.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget threads idle for longer than the TTL.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut threads = self.threads.lock().unwrap_or_else(|p| p.into_inner());
        let before = threads.len();
        threads.retain(|_, t| now.saturating_duration_since(t.updated) < self.ttl);
        before - threads.len()
    }

    pub fn len(&self) -> usize {
        self.threads.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.threads.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(id: &str) -> ConversationTurn {
        ConversationTurn {
            message_id: MessageId::from(id),
            author: AgentId::from_key_bytes(&[1u8; 32]),
            kind: MessageKind::Broadcast,
            content: format!("content of {id}"),
            timestamp: 0,
        }
    }

    #[test]
    fn context_is_ordered_and_bounded() {
        let log = ConversationLog::new(Duration::from_secs(60));
        for i in 0..(MAX_TURNS_PER_CONVERSATION + 5) {
            log.record("c", turn(&format!("m{i}")));
        }
        let ctx = log.context("c");
        assert_eq!(ctx.len(), MAX_TURNS_PER_CONVERSATION);
        assert_eq!(ctx[0].message_id, MessageId::from("m5"));
        assert!(log.context("other").is_empty());
    }

    #[test]
    fn same_message_is_recorded_once() {
        let log = ConversationLog::new(Duration::from_secs(60));
        log.record("c", turn("m1"));
        log.record("c", turn("m1"));
        assert_eq!(log.context("c").len(), 1);
    }

    #[test]
    fn sweep_forgets_idle_threads() {
        let log = ConversationLog::new(Duration::from_secs(60));
        let t0 = Instant::now();
        log.record_at("idle", turn("a"), t0);
        log.record_at("busy", turn("b"), t0 + Duration::from_secs(50));
        assert_eq!(log.sweep(t0 + Duration::from_secs(70)), 1);
        assert!(log.context("idle").is_empty());
        assert_eq!(log.context("busy").len(), 1);
    }

    #[test]
    fn stalest_thread_is_evicted_at_capacity() {
        let log = ConversationLog::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        for i in 0..MAX_CONVERSATIONS {
            log.record_at(&format!("c{i}"), turn("m"), t0 + Duration::from_millis(i as u64 + 1));
        }
        log.record_at("newcomer", turn("m"), t0 + Duration::from_secs(10));
        assert_eq!(log.len(), MAX_CONVERSATIONS);
        assert!(log.context("c0").is_empty());
        assert_eq!(log.context("newcomer").len(), 1);
    }
}
