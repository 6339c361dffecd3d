/// ─── AgentNet Protocol Constants ────────────────────────────────────────────
///
/// Agents discover each other over gossip, exchange signed envelopes and
/// settle pay-per-answer rewards through an external token transfer.

// ── Wire ─────────────────────────────────────────────────────────────────────

/// Protocol version advertised in every announcement (semver).
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// GossipSub topic carrying signed announcements.
pub const ANNOUNCE_TOPIC: &str = "agent-announcements";

/// GossipSub topic carrying broadcasts, questions and answers.
pub const MESSAGE_TOPIC: &str = "agent-messages";

/// Envelopes larger than this are rejected before JSON parsing.
pub const MAX_ENVELOPE_BYTES: usize = 256 * 1024;

// ── Timing defaults (seconds) ────────────────────────────────────────────────

pub const DEFAULT_ANNOUNCE_INTERVAL_SECS: u64 = 60;

/// Upper bound for dials, reward transfers and responder calls.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Processed message ids are forgotten after 24 hours.
pub const DEFAULT_DEDUP_TTL_SECS: u64 = 24 * 3600;

/// Unanswered questions expire after 24 hours.
pub const DEFAULT_QUESTION_TTL_SECS: u64 = 24 * 3600;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

// ── Bounds ───────────────────────────────────────────────────────────────────

/// Hard cap on remembered message ids; oldest evicted first.
pub const DEFAULT_DEDUP_CAPACITY: usize = 100_000;

pub const MAX_TURNS_PER_CONVERSATION: usize = 20;

pub const MAX_CONVERSATIONS: usize = 1_000;

// ── Node ─────────────────────────────────────────────────────────────────────

pub const DEFAULT_LISTEN_PORT: u16 = 7700;
