//! Reward settlement backends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tracing::info;

use agentnet_core::types::{AgentId, Amount};
use agentnet_p2p::TokenTransfer;

use crate::config::RpcConfig;

/// JSON-RPC 2.0 client for a wallet service that moves tokens.
///
/// Calls `method` with `{ "to": <agent id>, "amount": <string> }` and
/// expects the transaction id as a string result.
pub struct RpcTokenTransfer {
    url: String,
    method: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcTokenTransfer {
    pub fn new(config: &RpcConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            url: config.url.clone(),
            method: config.method.clone(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(&self, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": self.method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed)
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("connecting to wallet at {}", self.url))?;

        let json: serde_json::Value = resp.json().await.context("parsing RPC response")?;
        rpc_result(json)
    }
}

fn rpc_result(json: serde_json::Value) -> anyhow::Result<serde_json::Value> {
    if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
        bail!("RPC error: {}", err);
    }
    match json.get("result") {
        Some(result) if !result.is_null() => Ok(result.clone()),
        _ => bail!("RPC response has no result"),
    }
}

fn tx_id(result: &serde_json::Value) -> anyhow::Result<String> {
    result
        .as_str()
        .or_else(|| result.get("txId").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .context("unexpected transfer result")
}

#[async_trait]
impl TokenTransfer for RpcTokenTransfer {
    async fn transfer(&self, to: &AgentId, amount: Amount) -> anyhow::Result<String> {
        let result = self
            .call(serde_json::json!({ "to": to, "amount": amount.to_string() }))
            .await?;
        tx_id(&result)
    }
}

/// Logs each transfer and returns a synthetic transaction id.
#[derive(Default)]
pub struct DryRunTransfer {
    count: AtomicU64,
}

#[async_trait]
impl TokenTransfer for DryRunTransfer {
    async fn transfer(&self, to: &AgentId, amount: Amount) -> anyhow::Result<String> {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        info!(to = %to, amount, "dry-run transfer (no tokens moved)");
        Ok(format!("dry-run-{n}"))
    }
}
