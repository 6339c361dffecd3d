use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentnet_core::announcement::major_of;
use agentnet_core::constants::PROTOCOL_VERSION;
use agentnet_core::types::{now_millis, AgentId, Timestamp};
use agentnet_core::{Announcement, Envelope, MessageKind};
use tracing::{debug, info, warn};

use crate::config::NetConfig;
use crate::error::{NetError, TransportError};
use crate::outbox::Outbox;
use crate::peers::PeerDirectory;

/// Lifecycle of the announcement loop. There is no failed state: a bad
/// publish is logged and the next tick tries again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncerState {
    Stopped,
    Starting,
    Announcing,
}

/// Latest announcement seen from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub agent_id: AgentId,
    pub display_name: String,
    pub protocol_version: String,
    pub addresses: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub last_seen: Timestamp,
}

/// Periodic self-announcement plus processing of peers' announcements.
pub struct AnnouncementService {
    outbox: Outbox,
    peers: Arc<PeerDirectory>,
    display_name: String,
    metadata: BTreeMap<String, String>,
    dial_timeout: Duration,
    advertised: Mutex<Vec<String>>,
    state: Mutex<AnnouncerState>,
    roster: Mutex<HashMap<AgentId, RosterEntry>>,
}

impl AnnouncementService {
    pub fn new(outbox: Outbox, peers: Arc<PeerDirectory>, config: &NetConfig) -> Self {
        Self {
            outbox,
            peers,
            display_name: config.display_name.clone(),
            metadata: config.metadata.clone(),
            dial_timeout: config.operation_timeout(),
            advertised: Mutex::new(Vec::new()),
            state: Mutex::new(AnnouncerState::Stopped),
            roster: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> AnnouncerState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, next: AnnouncerState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = next;
    }

    /// Arm the service with the addresses we are reachable at.
    pub fn start(&self, advertised: Vec<String>) {
        self.peers.set_own_addresses(&advertised);
        *self.advertised.lock().unwrap_or_else(|p| p.into_inner()) = advertised;
        self.set_state(AnnouncerState::Starting);
    }

    pub fn stop(&self) {
        self.set_state(AnnouncerState::Stopped);
        self.roster.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Build our signed announcement wrapped in an unsigned envelope draft.
    pub fn build(&self) -> Result<Envelope, NetError> {
        let codec = self.outbox.codec();
        let announcement = codec.seal_announcement(Announcement {
            agent_id: codec.agent_id().clone(),
            display_name: self.display_name.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            timestamp: now_millis(),
            advertised_addresses: self
                .advertised
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            metadata: self.metadata.clone(),
            signature: String::new(),
        })?;
        Ok(Envelope::draft(
            MessageKind::Announcement,
            codec.agent_id().clone(),
            announcement.to_content()?,
        ))
    }

    /// Publish one announcement. Never fails; problems are logged and the
    /// next interval retries.
    pub async fn announce(&self) {
        if self.state() == AnnouncerState::Stopped {
            return;
        }
        let draft = match self.build() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to build announcement");
                return;
            }
        };
        match self.outbox.send(draft).await {
            Ok(env) => {
                if self.state() == AnnouncerState::Starting {
                    info!(id = %env.message_id, "first announcement published");
                    self.set_state(AnnouncerState::Announcing);
                } else {
                    debug!(id = %env.message_id, "announcement published");
                }
            }
            Err(NetError::Transport(TransportError::NoPeers(_))) => {
                debug!("no peers yet; announcement will be retried");
            }
            Err(NetError::NotRunning) => {}
            Err(e) => warn!(error = %e, "announcement publish failed"),
        }
    }

    /// Process a verified `announcement` envelope from the wire.
    pub async fn handle(&self, envelope: &Envelope) {
        if self.state() == AnnouncerState::Stopped {
            return;
        }
        let codec = self.outbox.codec();
        let announcement = match Announcement::from_content(&envelope.content) {
            Ok(a) => a,
            Err(e) => {
                warn!(from = %envelope.from_agent_id.short(), error = %e, "malformed announcement");
                return;
            }
        };
        if let Err(e) = codec.verify_announcement(envelope, &announcement) {
            warn!(from = %envelope.from_agent_id.short(), error = %e, "announcement failed verification");
            return;
        }
        if &announcement.agent_id == codec.agent_id() {
            debug!("ignoring our own announcement");
            return;
        }
        if announcement.major_version() != major_of(PROTOCOL_VERSION) {
            warn!(
                agent = %announcement.agent_id.short(),
                version = %announcement.protocol_version,
                "ignoring announcement with incompatible protocol version"
            );
            return;
        }

        self.roster.lock().unwrap_or_else(|p| p.into_inner()).insert(
            announcement.agent_id.clone(),
            RosterEntry {
                agent_id: announcement.agent_id.clone(),
                display_name: announcement.display_name.clone(),
                protocol_version: announcement.protocol_version.clone(),
                addresses: announcement.advertised_addresses.clone(),
                metadata: announcement.metadata.clone(),
                last_seen: now_millis(),
            },
        );

        // Claimed addresses are remembered before dialing, so a failed dial
        // still counts as the one attempt.
        for address in self.peers.claim_unknown(&announcement.advertised_addresses) {
            self.dial(announcement.agent_id.short(), &address).await;
        }
    }

    /// Dial each configured seed that is not already known, once.
    pub async fn dial_seeds(&self, seeds: &[String]) {
        for address in self.peers.claim_unknown(seeds) {
            self.dial("seed", &address).await;
        }
    }

    async fn dial(&self, via: &str, address: &str) {
        let transport = self.outbox.transport();
        match tokio::time::timeout(self.dial_timeout, transport.dial(address)).await {
            Ok(Ok(())) => info!(%via, %address, "dialed peer"),
            Ok(Err(e)) => warn!(%via, %address, error = %e, "dial failed"),
            Err(_) => warn!(%via, %address, timeout = ?self.dial_timeout, "dial timed out"),
        }
    }

    /// Peers that have announced themselves this session.
    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self
            .roster
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MessageCodec;
    use crate::memory::MemoryHub;
    use crate::transport::Transport;
    use agentnet_crypto::KeyPair;

    async fn service(hub: &MemoryHub, name: &str) -> (AnnouncementService, MessageCodec) {
        let transport = Arc::new(hub.transport(name));
        let listening = transport.listen(1).await.unwrap();
        let codec = MessageCodec::new(Arc::new(KeyPair::generate()));
        let outbox = Outbox::new(codec.clone(), transport);
        outbox.open();
        let svc = AnnouncementService::new(outbox, Arc::new(PeerDirectory::new()), &NetConfig::default());
        svc.start(listening.addresses);
        (svc, codec)
    }

    fn carrier(codec: &MessageCodec, addresses: Vec<String>, version: &str) -> Envelope {
        let ann = codec
            .seal_announcement(Announcement {
                agent_id: codec.agent_id().clone(),
                display_name: "peer".into(),
                protocol_version: version.into(),
                timestamp: now_millis(),
                advertised_addresses: addresses,
                metadata: BTreeMap::new(),
                signature: String::new(),
            })
            .unwrap();
        codec
            .seal(Envelope::draft(
                MessageKind::Announcement,
                codec.agent_id().clone(),
                ann.to_content().unwrap(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn own_announcement_verifies_and_advances_state() {
        let hub = MemoryHub::new();
        let (svc, codec) = service(&hub, "a").await;
        assert_eq!(svc.state(), AnnouncerState::Starting);

        let sealed = codec.seal(svc.build().unwrap()).unwrap();
        let ann = Announcement::from_content(&sealed.content).unwrap();
        assert!(codec.verify_announcement(&sealed, &ann).is_ok());
        assert_eq!(ann.advertised_addresses, vec!["/memory/a/1".to_string()]);

        svc.announce().await;
        assert_eq!(svc.state(), AnnouncerState::Announcing);
        assert_eq!(hub.published().len(), 1);
    }

    #[tokio::test]
    async fn foreign_addresses_are_dialed_once_even_when_unreachable() {
        let hub = MemoryHub::new();
        let (svc, _) = service(&hub, "a").await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        let env = carrier(&peer, vec!["/memory/offline/9".into()], "1.4.2");

        svc.handle(&env).await;
        svc.handle(&env).await;

        assert_eq!(hub.dial_count("/memory/a/1", "/memory/offline/9"), 1);
        assert!(!hub.dials()[0].succeeded);
        assert_eq!(svc.roster().len(), 1);
    }

    #[tokio::test]
    async fn self_and_incompatible_announcements_are_ignored() {
        let hub = MemoryHub::new();
        let (svc, codec) = service(&hub, "a").await;

        svc.handle(&carrier(&codec, vec!["/memory/x/1".into()], "1.0.0")).await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        svc.handle(&carrier(&peer, vec!["/memory/y/1".into()], "2.0.0")).await;

        assert!(hub.dials().is_empty());
        assert!(svc.roster().is_empty());
    }

    #[tokio::test]
    async fn seeds_are_dialed_once() {
        let hub = MemoryHub::new();
        let (svc, _) = service(&hub, "a").await;
        let _b = hub.transport("b").listen(2).await.unwrap();
        let seeds = vec!["/memory/b/2".to_string(), "/memory/b/2".to_string()];
        svc.dial_seeds(&seeds).await;
        svc.dial_seeds(&seeds).await;
        assert_eq!(hub.dial_count("/memory/a/1", "/memory/b/2"), 1);
        assert!(hub.dials()[0].succeeded);
    }

    #[tokio::test]
    async fn our_own_address_is_never_dialed() {
        let hub = MemoryHub::new();
        let (svc, _) = service(&hub, "a").await;
        let peer = MessageCodec::new(Arc::new(KeyPair::generate()));
        svc.handle(&carrier(&peer, vec!["/memory/a/1".into()], "1.0.0")).await;
        assert!(hub.dials().is_empty());
    }
}
