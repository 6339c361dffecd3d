//! agentnet-p2p
//!
//! Agent messaging protocol over a publish/subscribe transport.
//!
//! Agents announce themselves on `agent-announcements` and dial each other's
//! advertised addresses. Signed envelopes on `agent-messages` carry
//! broadcasts, questions and answers; the first answer to a question with a
//! reward triggers exactly one token transfer.
//!
//! The libp2p GossipSub transport lives in [`network`]; [`memory`] provides
//! an in-process hub for tests and local simulations.

pub mod announce;
pub mod codec;
pub mod config;
pub mod conversation;
pub mod dedup;
pub mod error;
pub mod facade;
pub mod ledger;
pub mod memory;
pub mod message;
pub mod network;
pub mod outbox;
pub mod peers;
pub mod router;
pub mod service;
pub mod transport;

pub use announce::{AnnouncementService, AnnouncerState, RosterEntry};
pub use codec::MessageCodec;
pub use config::{NetConfig, P2pConfig};
pub use conversation::{ConversationLog, ConversationTurn};
pub use dedup::DeliveryDedup;
pub use error::{CodecError, NetError, TransportError};
pub use facade::{NetworkFacade, SessionState};
pub use ledger::{PendingQuestion, QuestionLedger};
pub use memory::{MemoryHub, MemoryTransport};
pub use message::{InboundMessage, TOPICS};
pub use network::{P2pNetwork, P2pTransport};
pub use outbox::Outbox;
pub use peers::PeerDirectory;
pub use router::MessageRouter;
pub use service::{ConversationContext, Responder, TokenTransfer};
pub use transport::{Listening, Transport};
