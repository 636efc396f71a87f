//! Grounded answer synthesis over an ordered provider chain.
//!
//! Each [`CompletionProvider`] returns `Result<String>`. The [`Synthesizer`]
//! walks the chain in priority order and returns the first non-empty
//! answer; a failing provider is logged and skipped. `synthesize` itself
//! never fails.
//!
//! Default chain (see [`Synthesizer::from_config`]):
//!
//! 1. Groq (OpenAI-compatible API), when `GROQ_API_KEY` is set
//! 2. OpenAI chat completions, when `OPENAI_API_KEY` is set

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::{GenerationConfig, Secrets};

/// Canonical refusal when the documents do not contain an answer.
pub const DONT_KNOW: &str = "I don't know based on the documents.";

/// Returned by [`Synthesizer::synthesize`] when the chain is empty.
pub const NOT_CONFIGURED: &str = "Completion provider not configured.";

pub const SYSTEM_PROMPT: &str = "You are a document assistant. Answer the user's question strictly \
based on the context provided below. Cite facts with the bracketed numbers that precede each \
context chunk (e.g., [1], [2]). If the context does not contain the answer, reply: \
'I don't know based on the documents.'";

/// One prior question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Conversation state owned by the caller.
///
/// Pass it by `&mut` to [`Rag::answer_in_session`](crate::rag::Rag::answer_in_session);
/// prior turns are replayed to the provider so follow-up questions keep
/// their context. Only the most recent `max_turns` are kept.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl Session {
    pub fn new(max_turns: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            turns: VecDeque::new(),
            max_turns,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn record(&mut self, question: &str, answer: &str) {
        if self.max_turns == 0 {
            return;
        }
        self.turns.push_back(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
        });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Complete `user` under `system`, replaying `history` first.
    async fn complete(&self, system: &str, history: &[Turn], user: &str) -> Result<String>;
}

// ============ OpenAI-compatible chat completions ============

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Provider for any `/chat/completions` endpoint speaking the OpenAI wire
/// format (OpenAI itself, Groq).
pub struct ChatCompletionsProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatCompletionsProvider {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: String,
        model: &str,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            name: name.to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            temperature,
        })
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, system: &str, history: &[Turn], user: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
        for turn in history {
            messages.push(ChatMessage {
                role: "user",
                content: &turn.question,
            });
            messages.push(ChatMessage {
                role: "assistant",
                content: &turn.answer,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.name))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("{} API error {}: {}", self.name, status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content`, trimmed. Empty content is an error.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::trim)
        .unwrap_or_default();

    if content.is_empty() {
        bail!("completion response had no content");
    }
    Ok(content.to_string())
}

// ============ Synthesizer ============

/// User prompt sent with every request.
pub fn user_prompt(question: &str, context: &str) -> String {
    format!("Question: {}\n\nContext:\n{}", question, context)
}

pub struct Synthesizer {
    providers: Vec<Box<dyn CompletionProvider>>,
}

impl Synthesizer {
    /// Providers are tried in the given order.
    pub fn new(providers: Vec<Box<dyn CompletionProvider>>) -> Self {
        Self { providers }
    }

    /// Groq first when keyed, then OpenAI when keyed.
    pub fn from_config(config: &GenerationConfig, secrets: &Secrets) -> Result<Self> {
        let mut providers: Vec<Box<dyn CompletionProvider>> = Vec::new();

        if let Some(key) = &secrets.groq_api_key {
            providers.push(Box::new(ChatCompletionsProvider::new(
                "groq",
                &config.groq_base_url,
                key.clone(),
                &config.groq_model,
                config.temperature,
                config.timeout_secs,
            )?));
        }
        if let Some(key) = &secrets.openai_api_key {
            providers.push(Box::new(ChatCompletionsProvider::new(
                "openai",
                &config.openai_base_url,
                key.clone(),
                &config.openai_model,
                config.temperature,
                config.timeout_secs,
            )?));
        }

        Ok(Self::new(providers))
    }

    pub fn is_configured(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Answer `question` from `context`.
    ///
    /// Returns [`NOT_CONFIGURED`] with no providers and [`DONT_KNOW`] when
    /// every provider failed.
    pub async fn synthesize(&self, question: &str, context: &str, history: &[Turn]) -> String {
        if self.providers.is_empty() {
            return NOT_CONFIGURED.to_string();
        }

        let prompt = user_prompt(question, context);

        for provider in &self.providers {
            let span = info_span!("complete", provider = provider.name());
            match provider
                .complete(SYSTEM_PROMPT, history, &prompt)
                .instrument(span)
                .await
            {
                Ok(answer) => {
                    debug!(provider = provider.name(), "answer synthesized");
                    return answer;
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "completion provider failed");
                }
            }
        }

        DONT_KNOW.to_string()
    }
}
