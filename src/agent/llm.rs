//! Chat completion client
//!
//! Both backends speak the `OpenAI` chat-completions wire format: Gemini via
//! its compatibility endpoint, Ollama via `/v1`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{Config, LlmProvider};
use crate::context::{ChatMessage, ChatRole};
use crate::{Error, Result};

/// Gemini `OpenAI`-compatible base URL
pub const GEMINI_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Produces a reply for the next user utterance
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a conversation
    ///
    /// `history` is oldest first and does not include `prompt`.
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be reached or returns no text
    async fn complete(&self, system: &str, history: &[ChatMessage], prompt: &str) -> Result<String>;
}

/// HTTP chat model client
#[derive(Debug)]
pub struct ChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatModel {
    /// Create a client for an `OpenAI`-compatible endpoint
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature,
        }
    }

    /// Build the client for the configured backend
    ///
    /// # Errors
    ///
    /// Returns error if the Gemini backend is selected without an API key
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.llm.provider {
            LlmProvider::Gemini => {
                let key = config.api_keys.google.as_ref().ok_or_else(|| {
                    Error::Config("GOOGLE_API_KEY is required for the gemini backend".to_string())
                })?;
                Ok(Self::new(
                    GEMINI_OPENAI_BASE,
                    Some(SecretString::from(key.expose_secret().to_owned())),
                    config.llm.model.clone(),
                    config.llm.temperature,
                ))
            }
            LlmProvider::Ollama => Ok(Self::new(
                format!("{}/v1", config.llm.base_url.trim_end_matches('/')),
                None,
                config.llm.model.clone(),
                config.llm.temperature,
            )),
        }
    }

    /// Model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

fn build_messages<'a>(
    system: &'a str,
    history: &'a [ChatMessage],
    prompt: &'a str,
) -> Vec<WireMessage<'a>> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if !system.is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: system,
        });
    }
    messages.extend(history.iter().map(|m| WireMessage {
        role: match m.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        },
        content: &m.content,
    }));
    messages.push(WireMessage {
        role: "user",
        content: prompt,
    });
    messages
}

#[async_trait]
impl LanguageModel for ChatModel {
    async fn complete(&self, system: &str, history: &[ChatMessage], prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages: build_messages(system, history, prompt),
            temperature: self.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        tracing::debug!(model = %self.model, history = history.len(), "requesting completion");

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!("completion error {status}: {body}")));
        }

        let result: CompletionResponse = response.json().await?;
        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Agent("empty completion".to_string()))?;

        Ok(text)
    }
}
