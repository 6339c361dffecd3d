use std::sync::Arc;
use std::time::Duration;

use agentnet_core::types::{now_millis, AgentId, Amount, MessageId};
use agentnet_core::{Envelope, MessageKind};
use agentnet_crypto::Signer;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::announce::{AnnouncementService, RosterEntry};
use crate::codec::MessageCodec;
use crate::config::NetConfig;
use crate::error::NetError;
use crate::message::{InboundMessage, TOPICS};
use crate::outbox::Outbox;
use crate::peers::PeerDirectory;
use crate::router::MessageRouter;
use crate::service::{Responder, TokenTransfer};
use crate::transport::Transport;

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

struct Session {
    addresses: Vec<String>,
    shutdown: watch::Sender<bool>,
    event_loop: JoinHandle<()>,
    seeding: JoinHandle<()>,
}

enum Lifecycle {
    Idle,
    Running(Session),
    Stopped,
}

/// Entry point for callers: one agent's network session.
///
/// A facade runs at most one session. After [`NetworkFacade::stop`] it
/// refuses to start again; build a new facade (and transport) instead.
pub struct NetworkFacade {
    config: NetConfig,
    outbox: Outbox,
    peers: Arc<PeerDirectory>,
    announcer: Arc<AnnouncementService>,
    router: Arc<MessageRouter>,
    lifecycle: Mutex<Lifecycle>,
}

impl NetworkFacade {
    pub fn new(
        config: NetConfig,
        signer: Arc<dyn Signer>,
        transport: Arc<dyn Transport>,
        responder: Arc<dyn Responder>,
        treasury: Arc<dyn TokenTransfer>,
    ) -> Self {
        let outbox = Outbox::new(MessageCodec::new(signer), transport);
        let peers = Arc::new(PeerDirectory::new());
        let announcer = Arc::new(AnnouncementService::new(outbox.clone(), peers.clone(), &config));
        let router = Arc::new(MessageRouter::new(
            outbox.clone(),
            announcer.clone(),
            responder,
            treasury,
            &config,
        ));
        Self {
            config,
            outbox,
            peers,
            announcer,
            router,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        self.outbox.codec().agent_id()
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Bind, subscribe, and begin announcing. Returns our advertised
    /// addresses. Calling again while running returns the same addresses.
    pub async fn start(&self, listen_port: u16, seed_peers: &[String]) -> Result<Vec<String>, NetError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match &*lifecycle {
            Lifecycle::Running(session) => return Ok(session.addresses.clone()),
            Lifecycle::Stopped => return Err(NetError::Stopped),
            Lifecycle::Idle => {}
        }

        let transport = self.outbox.transport().clone();
        let listening = transport.listen(listen_port).await?;
        for topic in TOPICS {
            if let Err(e) = transport.subscribe(topic).await {
                // The inbound stream is gone with `listening`; this facade
                // cannot be restarted on the same transport.
                transport.shutdown().await;
                *lifecycle = Lifecycle::Stopped;
                return Err(e.into());
            }
        }

        let addresses = listening.addresses;
        self.outbox.open();
        self.announcer.start(addresses.clone());

        let seeding = {
            let announcer = self.announcer.clone();
            let seeds = seed_peers.to_vec();
            tokio::spawn(async move { announcer.dial_seeds(&seeds).await })
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let event_loop = tokio::spawn(run_event_loop(
            self.router.clone(),
            self.announcer.clone(),
            listening.inbound,
            shutdown_rx,
            self.config.announce_interval(),
            self.config.sweep_interval(),
        ));

        info!(
            agent = %self.agent_id(),
            addresses = ?addresses,
            seeds = seed_peers.len(),
            "network session started"
        );
        *lifecycle = Lifecycle::Running(Session {
            addresses: addresses.clone(),
            shutdown,
            event_loop,
            seeding,
        });
        Ok(addresses)
    }

    /// End the session: stop the loop, unsubscribe, release the transport,
    /// and discard all session state including pending questions.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);
        let Lifecycle::Running(session) = previous else {
            return;
        };

        self.outbox.close();
        let _ = session.shutdown.send(true);
        if let Err(e) = session.event_loop.await {
            warn!(error = %e, "event loop ended abnormally");
        }
        session.seeding.abort();

        let transport = self.outbox.transport();
        for topic in TOPICS {
            if let Err(e) = transport.unsubscribe(topic).await {
                debug!(topic, error = %e, "unsubscribe failed during stop");
            }
        }
        transport.shutdown().await;

        self.announcer.stop();
        self.router.clear();
        self.peers.clear();
        info!(agent = %self.agent_id(), "network session stopped");
    }

    /// Publish `content` to every agent.
    pub async fn broadcast(&self, content: &str) -> Result<MessageId, NetError> {
        let draft = Envelope::draft(MessageKind::Broadcast, self.agent_id().clone(), content);
        self.publish(draft).await
    }

    /// Publish `content` addressed to one agent. Other agents still relay
    /// it but drop it on receipt.
    pub async fn send_direct(&self, content: &str, to: &AgentId) -> Result<MessageId, NetError> {
        if to == self.agent_id() {
            return Err(NetError::SelfAddressed);
        }
        let draft = Envelope::draft(MessageKind::Broadcast, self.agent_id().clone(), content).to(to.clone());
        self.publish(draft).await
    }

    /// Ask the network a question. The first answer that arrives is paid
    /// `reward` (if non-zero).
    pub async fn ask(&self, content: &str, reward: Amount) -> Result<MessageId, NetError> {
        if !self.outbox.is_live() {
            return Err(NetError::NotRunning);
        }
        let ledger = self.router.ledger();
        let id = ledger.ask(self.agent_id(), content, reward, now_millis());
        let mut draft = Envelope::draft(MessageKind::Question, self.agent_id().clone(), content).with_id(id.clone());
        if reward > 0 {
            draft = draft.with_reward(reward);
        }
        match self.publish(draft).await {
            Ok(id) => {
                info!(question = %id, reward, "question published");
                Ok(id)
            }
            Err(e) => {
                ledger.cancel(&id);
                Err(e)
            }
        }
    }

    async fn publish(&self, draft: Envelope) -> Result<MessageId, NetError> {
        let sent = self.outbox.send(draft).await?;
        self.router.record_outbound(&sent);
        Ok(sent.message_id)
    }

    pub fn known_peers(&self) -> Vec<String> {
        self.peers.snapshot()
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.announcer.roster()
    }

    pub fn pending_questions(&self) -> usize {
        self.router.ledger().len()
    }

    pub async fn state(&self) -> SessionState {
        match &*self.lifecycle.lock().await {
            Lifecycle::Idle => SessionState::Idle,
            Lifecycle::Running(_) => SessionState::Running,
            Lifecycle::Stopped => SessionState::Stopped,
        }
    }

    /// Addresses bound by the running session, if any.
    pub async fn listen_addresses(&self) -> Vec<String> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running(session) => session.addresses.clone(),
            _ => Vec::new(),
        }
    }
}

async fn run_event_loop(
    router: Arc<MessageRouter>,
    announcer: Arc<AnnouncementService>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
    announce_every: Duration,
    sweep_every: Duration,
) {
    // First tick fires immediately, so we announce on start.
    let mut announce = tokio::time::interval(announce_every);
    announce.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep = tokio::time::interval_at(Instant::now() + sweep_every, sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            message = inbound.recv() => match message {
                Some(message) => {
                    if let Some(envelope) = router.admit(&message) {
                        tokio::spawn(router.clone().dispatch(envelope));
                    }
                }
                None => {
                    warn!("inbound stream closed");
                    break;
                }
            },

            _ = announce.tick() => announcer.announce().await,

            _ = sweep.tick() => router.sweep(Instant::now()),
        }
    }
    debug!("event loop exited");
}
