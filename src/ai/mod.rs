//! # ai — reasoning model collaborator
//!
//! [`Reasoner`] is what the orchestrator depends on.  [`HttpReasoner`] talks
//! to DeepSeek, Claude or OpenAI depending on `AI_PROVIDER`.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AiConfig, AiProvider};

#[cfg(test)]
pub mod mock;

const SYSTEM_PROMPT: &str =
    "You are an expert crypto perpetual futures trader. Always respond with valid JSON only.";

/// Raw model output.  `reasoning` is the chain-of-thought trace when the
/// provider exposes one.
#[derive(Debug, Clone, Default)]
pub struct AiReply {
    pub content:   String,
    pub reasoning: Option<String>,
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn decide(&self, prompt: &str) -> anyhow::Result<AiReply>;
}

pub struct HttpReasoner {
    client: reqwest::Client,
    config: AiConfig,
}

impl HttpReasoner {
    pub fn new(client: reqwest::Client, config: AiConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    async fn decide(&self, prompt: &str) -> anyhow::Result<AiReply> {
        match self.config.provider {
            AiProvider::DeepSeek => {
                call_chat_completions(&self.client, &self.config, "https://api.deepseek.com/chat/completions", prompt).await
            }
            AiProvider::OpenAi => {
                call_chat_completions(&self.client, &self.config, "https://api.openai.com/v1/chat/completions", prompt).await
            }
            AiProvider::Claude => call_claude(&self.client, &self.config, prompt).await,
        }
    }
}

// ─── Anthropic Claude ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model:      &'a str,
    max_tokens: u32,
    system:     &'a str,
    messages:   Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

async fn call_claude(client: &reqwest::Client, config: &AiConfig, prompt: &str) -> anyhow::Result<AiReply> {
    let body = ClaudeRequest {
        model:      &config.model,
        max_tokens: 4096,
        system:     SYSTEM_PROMPT,
        messages:   vec![ChatMessage { role: "user", content: prompt }],
    };

    debug!(model = %config.model, "Calling Claude API...");

    let resp = client
        .post("https://api.anthropic.com/v1/messages")
        .header("x-api-key", &config.api_key)
        .header("anthropic-version", "2023-06-01")
        .json(&body)
        .timeout(config.timeout)
        .send()
        .await
        .context("Claude API request failed")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("Claude API error {status}: {text}");
    }

    let data: ClaudeResponse = resp.json().await.context("Claude response parse error")?;

    let mut content = String::new();
    let mut reasoning = None;
    for block in data.content {
        match block.kind.as_str() {
            "text" => content.push_str(block.text.as_deref().unwrap_or_default()),
            "thinking" => reasoning = block.thinking,
            _ => {}
        }
    }
    if content.is_empty() {
        anyhow::bail!("Claude returned empty content");
    }
    Ok(AiReply { content, reasoning })
}

// ─── OpenAI-compatible (OpenAI, DeepSeek) ─────────────────────────────────────

#[derive(Serialize)]
struct ChatMessage<'a> {
    role:    &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model:    &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMsg,
}

#[derive(Deserialize)]
struct ChatChoiceMsg {
    content:           Option<String>,
    /// DeepSeek reasoner models only.
    #[serde(default)]
    reasoning_content: Option<String>,
}

async fn call_chat_completions(
    client: &reqwest::Client,
    config: &AiConfig,
    url:    &str,
    prompt: &str,
) -> anyhow::Result<AiReply> {
    let body = ChatRequest {
        model:    &config.model,
        messages: vec![
            ChatMessage { role: "system", content: SYSTEM_PROMPT },
            ChatMessage { role: "user",   content: prompt },
        ],
    };

    debug!(provider = %config.provider, model = %config.model, "Calling chat completions API...");

    let resp = client
        .post(url)
        .bearer_auth(&config.api_key)
        .json(&body)
        .timeout(config.timeout)
        .send()
        .await
        .with_context(|| format!("{} API request failed", config.provider))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("{} API error {status}: {text}", config.provider);
    }

    let data: ChatResponse = resp
        .json()
        .await
        .with_context(|| format!("{} response parse error", config.provider))?;

    let message = data
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .with_context(|| format!("{} returned no choices", config.provider))?;

    let content = message
        .content
        .filter(|c| !c.trim().is_empty())
        .with_context(|| format!("{} returned empty content", config.provider))?;

    Ok(AiReply {
        content,
        reasoning: message.reasoning_content.filter(|r| !r.trim().is_empty()),
    })
}
