use std::collections::BTreeMap;
use std::time::Duration;

use agentnet_core::constants::{
    DEFAULT_ANNOUNCE_INTERVAL_SECS, DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TTL_SECS,
    DEFAULT_LISTEN_PORT, DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_QUESTION_TTL_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
use agentnet_core::types::Amount;
use serde::{Deserialize, Serialize};

/// Configuration for the libp2p transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Interface to bind (e.g. "0.0.0.0").
    pub listen_host: String,
    /// Host peers should dial; substituted into advertised multiaddresses.
    pub advertise_host: String,
    /// Protocol version string sent over identify.
    pub protocol_version: String,
    /// Capacity of the command and inbound channels.
    pub channel_capacity: usize,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".into(),
            advertise_host: "127.0.0.1".into(),
            protocol_version: "/agentnet/1.0.0".into(),
            channel_capacity: 256,
        }
    }
}

/// Protocol-level configuration for a [`crate::NetworkFacade`] session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub listen_port: u16,
    /// Addresses dialed once on start.
    pub seed_peers: Vec<String>,
    /// Name carried in our announcements.
    pub display_name: String,
    /// Extra key/value pairs carried in our announcements.
    pub metadata: BTreeMap<String, String>,
    /// Reward attached to questions asked without an explicit amount.
    pub reward_per_question: Amount,
    pub announce_interval_secs: u64,
    /// Bound on dial, reward-transfer and responder calls.
    pub operation_timeout_secs: u64,
    pub dedup_ttl_secs: u64,
    pub dedup_capacity: usize,
    pub question_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Publish the responder's output as a direct reply to broadcasts.
    pub reply_to_broadcasts: bool,
    /// Send the answerer a receipt after a successful reward transfer.
    pub publish_receipts: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            seed_peers: Vec::new(),
            display_name: "agent".into(),
            metadata: BTreeMap::new(),
            reward_per_question: 0,
            announce_interval_secs: DEFAULT_ANNOUNCE_INTERVAL_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            dedup_ttl_secs: DEFAULT_DEDUP_TTL_SECS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            question_ttl_secs: DEFAULT_QUESTION_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            reply_to_broadcasts: false,
            publish_receipts: false,
        }
    }
}

impl NetConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs.max(1))
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn question_ttl(&self) -> Duration {
        Duration::from_secs(self.question_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: NetConfig =
            serde_json::from_str(r#"{"listen_port": 9000, "seed_peers": ["/ip4/1.2.3.4/tcp/1"]}"#)
                .unwrap();
        assert_eq!(cfg.listen_port, 9000);
        assert_eq!(cfg.seed_peers.len(), 1);
        assert_eq!(cfg.announce_interval(), Duration::from_secs(60));
        assert_eq!(cfg.operation_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.dedup_ttl(), Duration::from_secs(24 * 3600));
    }
}
