//! In-process gossip hub for tests and local simulations.
//!
//! Every listening [`MemoryTransport`] registers under a `/memory/<name>/<port>`
//! address. Publishing delivers to every *other* member subscribed to the
//! topic, matching GossipSub, which never echoes a node's own messages.
//! Dials succeed when the target address is registered and are recorded so
//! tests can count them. Only the most recent [`MAX_RECORDS`] dials and
//! publishes are kept.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::message::InboundMessage;
use crate::transport::{Listening, Transport};

const INBOUND_CAPACITY: usize = 1024;

/// Dial and publish records retained per hub.
pub const MAX_RECORDS: usize = 4096;

fn push_bounded<T>(records: &mut VecDeque<T>, record: T) {
    if records.len() >= MAX_RECORDS {
        records.pop_front();
    }
    records.push_back(record);
}

/// One recorded dial attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRecord {
    pub from: String,
    pub to: String,
    pub succeeded: bool,
}

/// One recorded publish.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub from: String,
    pub topic: String,
    pub data: Vec<u8>,
}

struct Member {
    subscriptions: HashSet<String>,
    inbound: mpsc::Sender<InboundMessage>,
}

#[derive(Default)]
struct HubState {
    members: HashMap<String, Member>,
    dials: VecDeque<DialRecord>,
    published: VecDeque<PublishRecord>,
}

/// Shared medium connecting [`MemoryTransport`]s.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport attached to this hub.
    pub fn transport(&self, name: &str) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            name: name.to_string(),
            address: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver raw bytes to one member as if they arrived from the network.
    /// Returns `false` if the member is gone or not subscribed.
    pub fn inject(&self, address: &str, topic: &str, data: Vec<u8>) -> bool {
        let state = self.lock();
        match state.members.get(address) {
            Some(m) if m.subscriptions.contains(topic) => m
                .inbound
                .try_send(InboundMessage::new(topic, data))
                .is_ok(),
            _ => false,
        }
    }

    pub fn dials(&self) -> Vec<DialRecord> {
        self.lock().dials.iter().cloned().collect()
    }

    /// Dial attempts made by `from` towards `to`.
    pub fn dial_count(&self, from: &str, to: &str) -> usize {
        self.lock()
            .dials
            .iter()
            .filter(|d| d.from == from && d.to == to)
            .count()
    }

    pub fn published(&self) -> Vec<PublishRecord> {
        self.lock().published.iter().cloned().collect()
    }

    pub fn is_member(&self, address: &str) -> bool {
        self.lock().members.contains_key(address)
    }
}

/// [`Transport`] endpoint on a [`MemoryHub`].
pub struct MemoryTransport {
    hub: MemoryHub,
    name: String,
    address: Mutex<Option<String>>,
}

impl MemoryTransport {
    fn local_address(&self) -> Result<String, TransportError> {
        self.address
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, port: u16) -> Result<Listening, TransportError> {
        let mut slot = self.address.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return Err(TransportError::AlreadyListening);
        }
        let address = format!("/memory/{}/{}", self.name, port);
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

        let mut state = self.hub.lock();
        if state.members.contains_key(&address) {
            return Err(TransportError::Listen(format!("{address} already in use")));
        }
        state.members.insert(
            address.clone(),
            Member { subscriptions: HashSet::new(), inbound: tx },
        );
        *slot = Some(address.clone());
        Ok(Listening { addresses: vec![address], inbound: rx })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let address = self.local_address()?;
        let mut state = self.hub.lock();
        let member = state.members.get_mut(&address).ok_or(TransportError::Closed)?;
        member.subscriptions.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let address = self.local_address()?;
        let mut state = self.hub.lock();
        if let Some(member) = state.members.get_mut(&address) {
            member.subscriptions.remove(topic);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), TransportError> {
        let address = self.local_address()?;
        let mut state = self.hub.lock();
        if !state.members.contains_key(&address) {
            return Err(TransportError::Closed);
        }
        push_bounded(
            &mut state.published,
            PublishRecord {
                from: address.clone(),
                topic: topic.to_string(),
                data: data.clone(),
            },
        );
        for (peer, member) in &state.members {
            if *peer == address || !member.subscriptions.contains(topic) {
                continue;
            }
            if member.inbound.try_send(InboundMessage::new(topic, data.clone())).is_err() {
                debug!(%peer, "memory hub dropped message for slow or closed member");
            }
        }
        Ok(())
    }

    async fn dial(&self, address: &str) -> Result<(), TransportError> {
        let from = self.local_address()?;
        let mut state = self.hub.lock();
        let succeeded = state.members.contains_key(address);
        push_bounded(
            &mut state.dials,
            DialRecord {
                from,
                to: address.to_string(),
                succeeded,
            },
        );
        if succeeded {
            Ok(())
        } else {
            Err(TransportError::Unreachable {
                address: address.to_string(),
                reason: "no such member".into(),
            })
        }
    }

    async fn shutdown(&self) {
        let address = self.address.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(address) = address {
            self.hub.lock().members.remove(&address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_other_subscribers_only() {
        let hub = MemoryHub::new();
        let a = hub.transport("a");
        let b = hub.transport("b");
        let c = hub.transport("c");
        let mut la = a.listen(1).await.unwrap();
        let mut lb = b.listen(1).await.unwrap();
        let mut lc = c.listen(1).await.unwrap();
        a.subscribe("t").await.unwrap();
        b.subscribe("t").await.unwrap();

        a.publish("t", b"hi".to_vec()).await.unwrap();

        assert_eq!(lb.inbound.recv().await.unwrap().data, b"hi");
        assert!(la.inbound.try_recv().is_err());
        assert!(lc.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn dials_are_recorded_with_outcome() {
        let hub = MemoryHub::new();
        let a = hub.transport("a");
        let b = hub.transport("b");
        let _la = a.listen(1).await.unwrap();
        let lb = b.listen(2).await.unwrap();

        assert!(a.dial(&lb.addresses[0]).await.is_ok());
        assert!(a.dial("/memory/ghost/9").await.is_err());
        assert_eq!(hub.dial_count("/memory/a/1", "/memory/b/2"), 1);
        assert_eq!(hub.dials().len(), 2);
    }

    #[tokio::test]
    async fn records_keep_only_the_most_recent() {
        let hub = MemoryHub::new();
        let a = hub.transport("a");
        let _la = a.listen(1).await.unwrap();
        for i in 0..(MAX_RECORDS + 3) {
            let _ = a.dial(&format!("/memory/ghost/{i}")).await;
            a.publish("t", i.to_le_bytes().to_vec()).await.unwrap();
        }

        let dials = hub.dials();
        assert_eq!(dials.len(), MAX_RECORDS);
        assert_eq!(dials[0].to, "/memory/ghost/3");
        let published = hub.published();
        assert_eq!(published.len(), MAX_RECORDS);
        assert_eq!(published[0].data, 3usize.to_le_bytes().to_vec());
    }

    #[tokio::test]
    async fn listen_twice_and_after_shutdown() {
        let hub = MemoryHub::new();
        let a = hub.transport("a");
        let _l = a.listen(1).await.unwrap();
        assert!(matches!(a.listen(1).await, Err(TransportError::AlreadyListening)));
        a.shutdown().await;
        assert!(!hub.is_member("/memory/a/1"));
        assert!(a.publish("t", vec![]).await.is_err());
    }
}
