use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use agentnet_core::types::MessageId;
use tokio::time::Instant;

#[derive(Default)]
struct Seen {
    at: HashMap<MessageId, Instant>,
    /// Insertion order; each id appears exactly once.
    order: VecDeque<(Instant, MessageId)>,
}

/// Bounded idempotency cache of processed message ids.
///
/// Entries expire after `ttl` on [`DeliveryDedup::sweep`]; beyond `capacity`
/// the oldest are evicted immediately.
pub struct DeliveryDedup {
    seen: Mutex<Seen>,
    ttl: Duration,
    capacity: usize,
}

impl DeliveryDedup {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            seen: Mutex::new(Seen::default()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Atomically test and mark `id` as seen.
    ///
    /// Returns `false` exactly once per id (the first delivery) and `true`
    /// for every later call until the entry expires.
    pub fn check_and_mark(&self, id: &MessageId) -> bool {
        self.check_and_mark_at(id, Instant::now())
    }

    pub fn check_and_mark_at(&self, id: &MessageId, now: Instant) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        if seen.at.contains_key(id) {
            return true;
        }
        seen.at.insert(id.clone(), now);
        seen.order.push_back((now, id.clone()));
        while seen.order.len() > self.capacity {
            if let Some((_, oldest)) = seen.order.pop_front() {
                seen.at.remove(&oldest);
            }
        }
        false
    }

    /// Drop entries older than the TTL. Returns how many were purged.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        let mut purged = 0;
        while let Some((at, _)) = seen.order.front() {
            if now.saturating_duration_since(*at) < self.ttl {
                break;
            }
            if let Some((_, id)) = seen.order.pop_front() {
                seen.at.remove(&id);
                purged += 1;
            }
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.at.clear();
        seen.order.clear();
    }
}
