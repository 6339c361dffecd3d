use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use agentnet_p2p::{NetConfig, P2pConfig};

/// Everything the node binary reads from its JSON config file.
///
/// Every section is optional; missing fields fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub net: NetConfig,
    pub p2p: P2pConfig,
    pub responder: ResponderConfig,
    pub settlement: SettlementConfig,
}

/// Which [`agentnet_p2p::Responder`] answers incoming messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponderConfig {
    /// Offline: reply with the received text.
    #[default]
    Echo,
    /// OpenAI-compatible chat completions endpoint.
    Chat(ChatConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// e.g. "https://api.openai.com/v1/chat/completions"
    pub endpoint: String,
    /// Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub model: String,
    /// Persona instructions sent as the system message.
    pub system_prompt: String,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            system_prompt: "You are an agent on a peer-to-peer network. Answer questions from other agents concisely.".into(),
            max_tokens: Some(512),
            timeout_secs: 30,
        }
    }
}

/// Which [`agentnet_p2p::TokenTransfer`] pays rewards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementConfig {
    /// Log transfers without moving tokens.
    #[default]
    DryRun,
    /// JSON-RPC 2.0 wallet endpoint.
    Rpc(RpcConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    /// Method invoked with `{ to, amount }`; must return a transaction id.
    pub method: String,
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".into(),
            method: "token_transfer".into(),
            timeout_secs: 30,
        }
    }
}

impl NodeConfig {
    /// Read `path`, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_all_defaults() {
        let cfg: NodeConfig = serde_json::from_str("{}").unwrap();
        assert!(matches!(cfg.responder, ResponderConfig::Echo));
        assert!(matches!(cfg.settlement, SettlementConfig::DryRun));
        assert_eq!(cfg.net.announce_interval_secs, 60);
    }

    #[test]
    fn tagged_sections_parse() {
        let cfg: NodeConfig = serde_json::from_str(
            r#"{
                "net": { "listen_port": 9100, "reward_per_question": 5 },
                "responder": { "kind": "chat", "model": "llama3", "endpoint": "http://localhost:11434/v1/chat/completions" },
                "settlement": { "kind": "rpc", "url": "http://wallet:8545" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.net.listen_port, 9100);
        assert_eq!(cfg.net.reward_per_question, 5);
        match cfg.responder {
            ResponderConfig::Chat(chat) => {
                assert_eq!(chat.model, "llama3");
                assert_eq!(chat.timeout_secs, 30);
            }
            other => panic!("unexpected responder {other:?}"),
        }
        match cfg.settlement {
            SettlementConfig::Rpc(rpc) => {
                assert_eq!(rpc.url, "http://wallet:8545");
                assert_eq!(rpc.method, "token_transfer");
            }
            other => panic!("unexpected settlement {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(NodeConfig::load(Some(Path::new("/nonexistent/agentnet.json"))).is_err());
        assert!(NodeConfig::load(None).is_ok());
    }
}
