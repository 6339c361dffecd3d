use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub, identify, noise, ping, tcp, yamux,
    multiaddr::Protocol,
    swarm::{dial_opts::DialOpts, ConnectionId, SwarmEvent},
    core::transport::ListenerId, Multiaddr, PeerId, Swarm,
};
use libp2p_swarm::NetworkBehaviour;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use agentnet_crypto::{blake3_hex, KeyPair};

use crate::config::P2pConfig;
use crate::error::TransportError;
use crate::message::InboundMessage;
use crate::transport::{Listening, Transport};

/// Combined libp2p network behaviour for AgentNet.
///
/// The `#[derive(NetworkBehaviour)]` macro auto-generates an
/// `AgentBehaviourEvent` enum with one variant per field.
#[derive(NetworkBehaviour)]
pub struct AgentBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

type Reply<T> = oneshot::Sender<Result<T, TransportError>>;

enum Command {
    Listen { port: u16, reply: Reply<Vec<String>> },
    Subscribe { topic: String, reply: Reply<()> },
    Unsubscribe { topic: String, reply: Reply<()> },
    Publish { topic: String, data: Vec<u8>, reply: Reply<()> },
    Dial { address: String, reply: Reply<()> },
    Shutdown,
}

/// Application-facing [`Transport`] backed by a libp2p swarm task.
pub struct P2pTransport {
    command_tx: mpsc::Sender<Command>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    local_peer_id: PeerId,
}

/// Owns the libp2p Swarm. Pass to `tokio::spawn(network.run())`.
pub struct P2pNetwork {
    swarm: Swarm<AgentBehaviour>,
    listen_host: String,
    advertise_host: String,
    command_rx: mpsc::Receiver<Command>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    pending_listens: HashMap<ListenerId, Reply<Vec<String>>>,
    pending_dials: HashMap<ConnectionId, (String, Reply<()>)>,
}

impl P2pNetwork {
    /// Build the network and return `(P2pNetwork, P2pTransport)`.
    ///
    /// The swarm reuses the agent's Ed25519 key, so its `PeerId` and the
    /// agent's address name the same key.
    pub fn new(
        config: &P2pConfig,
        keypair: &KeyPair,
    ) -> Result<(Self, P2pTransport), Box<dyn std::error::Error + Send + Sync>> {
        let mut seed = keypair.secret_bytes();
        let identity = libp2p::identity::Keypair::ed25519_from_bytes(&mut seed[..])?;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(identity)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key: &libp2p::identity::Keypair| {
                let message_id_fn = |msg: &gossipsub::Message| {
                    gossipsub::MessageId::from(blake3_hex(&msg.data))
                };

                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .message_id_fn(message_id_fn)
                    .build()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let identify = identify::Behaviour::new(identify::Config::new(
                    config.protocol_version.clone(),
                    key.public(),
                ));

                let ping = ping::Behaviour::default();

                Ok(AgentBehaviour { gossipsub, identify, ping })
            })?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(120)))
            .build();

        let local_peer_id = *swarm.local_peer_id();
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);

        let network = P2pNetwork {
            swarm,
            listen_host: config.listen_host.clone(),
            advertise_host: config.advertise_host.clone(),
            command_rx,
            inbound_tx,
            pending_listens: HashMap::new(),
            pending_dials: HashMap::new(),
        };
        let transport = P2pTransport {
            command_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            local_peer_id,
        };

        Ok((network, transport))
    }

    /// Drive the P2P event loop. Run in a dedicated tokio task.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => {
                        info!("P2P network shutting down");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },

                event = self.swarm.select_next_some() => {
                    self.handle_event(event).await;
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Listen { port, reply } => {
                let addr = format!("/ip4/{}/tcp/{}", self.listen_host, port);
                let result = addr
                    .parse::<Multiaddr>()
                    .map_err(|e| TransportError::Listen(format!("{addr}: {e}")))
                    .and_then(|ma| {
                        self.swarm
                            .listen_on(ma)
                            .map_err(|e| TransportError::Listen(e.to_string()))
                    });
                match result {
                    Ok(listener_id) => {
                        self.pending_listens.insert(listener_id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Subscribe { topic, reply } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .subscribe(&gossipsub::IdentTopic::new(&topic))
                    .map(|_| ())
                    .map_err(|e| TransportError::Subscribe { topic, reason: e.to_string() });
                let _ = reply.send(result);
            }
            Command::Unsubscribe { topic, reply } => {
                self.swarm
                    .behaviour_mut()
                    .gossipsub
                    .unsubscribe(&gossipsub::IdentTopic::new(&topic));
                let _ = reply.send(Ok(()));
            }
            Command::Publish { topic, data, reply } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(gossipsub::IdentTopic::new(&topic), data)
                    .map(|_| ())
                    .map_err(|e| match e {
                        gossipsub::PublishError::InsufficientPeers => TransportError::NoPeers(topic),
                        other => TransportError::Publish(other.to_string()),
                    });
                let _ = reply.send(result);
            }
            Command::Dial { address, reply } => {
                let addr = match address.parse::<Multiaddr>() {
                    Ok(a) => a,
                    Err(e) => {
                        let _ = reply.send(Err(TransportError::InvalidAddress {
                            address,
                            reason: e.to_string(),
                        }));
                        return;
                    }
                };
                let opts = DialOpts::from(addr);
                let connection_id = opts.connection_id();
                match self.swarm.dial(opts) {
                    Ok(()) => {
                        self.pending_dials.insert(connection_id, (address, reply));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(TransportError::Unreachable {
                            address,
                            reason: e.to_string(),
                        }));
                    }
                }
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_event(&mut self, event: SwarmEvent<AgentBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { listener_id, address } => {
                info!(addr = %address, "P2P listening on");
                if let Some(reply) = self.pending_listens.remove(&listener_id) {
                    let _ = reply.send(Ok(vec![self.advertised(&address)]));
                }
            }
            SwarmEvent::Behaviour(AgentBehaviourEvent::Gossipsub(
                gossipsub::Event::Message { message, .. },
            )) => {
                let inbound = InboundMessage::new(message.topic.as_str(), message.data);
                if self.inbound_tx.send(inbound).await.is_err() {
                    debug!("inbound receiver dropped; discarding gossip message");
                }
            }
            SwarmEvent::Behaviour(AgentBehaviourEvent::Identify(
                identify::Event::Received { peer_id, info, .. },
            )) => {
                debug!(peer = %peer_id, agent = %info.agent_version, "identified peer");
            }
            SwarmEvent::ConnectionEstablished { peer_id, connection_id, .. } => {
                debug!(peer = %peer_id, "connection established");
                if let Some((address, reply)) = self.pending_dials.remove(&connection_id) {
                    debug!(%address, "dial succeeded");
                    let _ = reply.send(Ok(()));
                }
            }
            SwarmEvent::OutgoingConnectionError { connection_id, error, .. } => {
                if let Some((address, reply)) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Err(TransportError::Unreachable {
                        address,
                        reason: error.to_string(),
                    }));
                } else {
                    debug!(error = %error, "outgoing connection failed");
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!(peer = %peer_id, "connection closed");
            }
            SwarmEvent::ListenerError { error, .. } => {
                warn!(error = %error, "listener error");
            }
            _ => {}
        }
    }

    /// `/ip4/<advertise_host>/tcp/<bound port>/p2p/<peer id>`
    fn advertised(&self, bound: &Multiaddr) -> String {
        let port = bound
            .iter()
            .find_map(|p| match p {
                Protocol::Tcp(port) => Some(port),
                _ => None,
            })
            .unwrap_or_default();
        format!(
            "/ip4/{}/tcp/{}/p2p/{}",
            self.advertise_host,
            port,
            self.swarm.local_peer_id()
        )
    }
}

impl P2pTransport {
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }
}

#[async_trait]
impl Transport for P2pTransport {
    async fn listen(&self, port: u16) -> Result<Listening, TransportError> {
        let mut slot = self.inbound_rx.lock().await;
        if slot.is_none() {
            return Err(TransportError::AlreadyListening);
        }
        let addresses = self.request(|reply| Command::Listen { port, reply }).await?;
        let inbound = slot.take().ok_or(TransportError::AlreadyListening)?;
        Ok(Listening { addresses, inbound })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(|reply| Command::Subscribe { topic, reply }).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(|reply| Command::Unsubscribe { topic, reply }).await
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(|reply| Command::Publish { topic, data, reply }).await
    }

    async fn dial(&self, address: &str) -> Result<(), TransportError> {
        let address = address.to_string();
        self.request(|reply| Command::Dial { address, reply }).await
    }

    async fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown).await;
    }
}
