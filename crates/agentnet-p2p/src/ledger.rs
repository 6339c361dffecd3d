use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use agentnet_core::types::{AgentId, Amount, MessageId, Timestamp};

/// A locally-asked question awaiting a reward-eligible answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    pub message_id: MessageId,
    pub asker_agent_id: AgentId,
    pub content: String,
    pub reward_amount: Amount,
    pub asked_at: Timestamp,
}

impl PendingQuestion {
    pub fn requires_reward(&self) -> bool {
        self.reward_amount > 0
    }
}

/// Outstanding questions keyed by message id.
///
/// [`QuestionLedger::resolve`] removes the entry it returns, so however many
/// answers arrive for one question, only the first ever sees it. This holds
/// independently of transport-level deduplication.
pub struct QuestionLedger {
    pending: Mutex<HashMap<MessageId, PendingQuestion>>,
    ttl: Duration,
}

impl QuestionLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Record a new question and return its id for correlation.
    pub fn ask(
        &self,
        asker: &AgentId,
        content: &str,
        reward_amount: Amount,
        now: Timestamp,
    ) -> MessageId {
        let question = PendingQuestion {
            message_id: MessageId::new(),
            asker_agent_id: asker.clone(),
            content: content.to_string(),
            reward_amount,
            asked_at: now,
        };
        let id = question.message_id.clone();
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.clone(), question);
        id
    }

    /// Remove and return the question `reply_to` answers, if still pending.
    pub fn resolve(&self, reply_to: &MessageId) -> Option<PendingQuestion> {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(reply_to)
    }

    /// Withdraw a question that never made it onto the wire.
    pub fn cancel(&self, id: &MessageId) -> Option<PendingQuestion> {
        self.resolve(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<PendingQuestion> {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    /// Drop questions older than the TTL and return them.
    pub fn expire(&self, now: Timestamp) -> Vec<PendingQuestion> {
        let ttl_ms = self.ttl.as_millis() as u64;
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let stale: Vec<MessageId> = pending
            .values()
            .filter(|q| now.saturating_sub(q.asked_at) >= ttl_ms)
            .map(|q| q.message_id.clone())
            .collect();
        stale.iter().filter_map(|id| pending.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every pending question.
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let n = pending.len();
        pending.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asker() -> AgentId {
        AgentId::from_key_bytes(&[9u8; 32])
    }

    #[test]
    fn resolve_consumes_exactly_once() {
        let ledger = QuestionLedger::new(Duration::from_secs(60));
        let id = ledger.ask(&asker(), "price of BTC?", 100, 0);

        let q = ledger.resolve(&id).expect("first answer resolves");
        assert_eq!(q.reward_amount, 100);
        assert_eq!(q.content, "price of BTC?");
        assert!(q.requires_reward());

        assert!(ledger.resolve(&id).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn unknown_reply_to_finds_nothing() {
        let ledger = QuestionLedger::new(Duration::from_secs(60));
        ledger.ask(&asker(), "q", 1, 0);
        assert!(ledger.resolve(&MessageId::from("not-ours")).is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn concurrent_resolves_pay_once() {
        use std::sync::Arc;

        let ledger = Arc::new(QuestionLedger::new(Duration::from_secs(60)));
        let id = ledger.ask(&asker(), "q", 5, 0);
        let winners: usize = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let id = id.clone();
                std::thread::spawn(move || ledger.resolve(&id).is_some())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn expire_drops_only_stale_questions() {
        let ledger = QuestionLedger::new(Duration::from_secs(10));
        let old = ledger.ask(&asker(), "old", 1, 1_000);
        let fresh = ledger.ask(&asker(), "fresh", 1, 9_000);

        let expired = ledger.expire(11_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].message_id, old);
        assert!(ledger.get(&fresh).is_some());
    }

    #[test]
    fn free_questions_need_no_reward() {
        let ledger = QuestionLedger::new(Duration::from_secs(10));
        let id = ledger.ask(&asker(), "free", 0, 0);
        assert!(!ledger.resolve(&id).unwrap().requires_reward());
    }
}
