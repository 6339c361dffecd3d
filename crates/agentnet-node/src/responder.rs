//! Responders: an OpenAI-compatible chat client and an offline echo.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use agentnet_core::types::AgentId;
use agentnet_p2p::{ConversationContext, Responder};

use crate::config::ChatConfig;

/// Replies with the text it was given. Useful for local networks without
/// model access.
pub struct EchoResponder {
    name: String,
}

impl EchoResponder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Responder for EchoResponder {
    async fn respond(&self, text: &str, context: &ConversationContext) -> anyhow::Result<String> {
        Ok(format!(
            "{} heard from {}: {}",
            self.name,
            context.peer.short(),
            text
        ))
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client. The conversation history becomes the message
/// list: our own turns as `assistant`, everyone else's as `user`.
pub struct ChatResponder {
    client: reqwest::Client,
    config: ChatConfig,
    local: AgentId,
}

impl ChatResponder {
    pub fn new(config: ChatConfig, local: AgentId) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        match &api_key {
            Some(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {key}"))
                    .context("API key is not a valid header value")?;
                headers.insert(AUTHORIZATION, value);
            }
            None if config.endpoint.contains("openai.com") => {
                warn!(endpoint = %config.endpoint, "no API key configured");
            }
            None => {}
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .default_headers(headers)
            .build()
            .context("building HTTP client")?;

        info!(endpoint = %config.endpoint, model = %config.model, "chat responder ready");
        Ok(Self { client, config, local })
    }

    fn messages(&self, text: &str, context: &ConversationContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: self.config.system_prompt.clone(),
        }];
        messages.extend(context.history.iter().map(|turn| ChatMessage {
            role: if turn.author == self.local { "assistant" } else { "user" },
            content: turn.content.clone(),
        }));
        // History normally ends with the message being answered.
        if context.history.last().map(|t| t.content.as_str()) != Some(text) {
            messages.push(ChatMessage {
                role: "user",
                content: text.to_string(),
            });
        }
        messages
    }
}

fn reply_text(response: ChatResponse) -> anyhow::Result<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if content.is_empty() {
        bail!("model returned an empty reply");
    }
    Ok(content)
}

#[async_trait]
impl Responder for ChatResponder {
    async fn respond(&self, text: &str, context: &ConversationContext) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: self.messages(text, context),
            max_tokens: self.config.max_tokens,
        };
        debug!(
            conversation = %context.conversation_id,
            turns = request.messages.len(),
            "requesting chat completion"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.config.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("chat completion failed with {status}: {body}");
        }
        let parsed: ChatResponse = response.json().await.context("parsing chat completion")?;
        reply_text(parsed)
    }
}
