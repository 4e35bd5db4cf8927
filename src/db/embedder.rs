//! Text embedding for semantic memory search

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{Config, LlmProvider};
use crate::{Error, Result};

/// Embedding dimension shared by text-embedding-004 and nomic-embed-text
pub const EMBEDDING_DIM: usize = 768;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Turns text into a fixed-length vector
#[async_trait]
pub trait Embed: Send + Sync {
    /// Embed a single text
    ///
    /// # Errors
    ///
    /// Returns error if the embedding service fails
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug)]
enum Backend {
    Gemini { api_key: SecretString },
    Ollama { base_url: String },
}

/// HTTP text embedder (Gemini or Ollama)
#[derive(Debug)]
pub struct Embedder {
    client: reqwest::Client,
    backend: Backend,
    model: String,
}

impl Embedder {
    /// Create a Gemini embedder
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn gemini(api_key: &SecretString, model: impl Into<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "Google API key required for embeddings".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            backend: Backend::Gemini {
                api_key: SecretString::from(api_key.expose_secret().to_owned()),
            },
            model: model.into(),
        })
    }

    /// Create an embedder backed by a local Ollama server
    #[must_use]
    pub fn ollama(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend: Backend::Ollama {
                base_url: base_url.into().trim_end_matches('/').to_string(),
            },
            model: model.into(),
        }
    }

    /// Build the embedder matching the configured LLM backend
    ///
    /// # Errors
    ///
    /// Returns error if the Gemini backend is selected without an API key
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.llm.provider {
            LlmProvider::Gemini => {
                let key = config.api_keys.google.as_ref().ok_or_else(|| {
                    Error::Config("GOOGLE_API_KEY is required for embeddings".to_string())
                })?;
                Self::gemini(key, config.embedding.model.clone())
            }
            LlmProvider::Ollama => Ok(Self::ollama(
                config.llm.base_url.clone(),
                config.embedding.model.clone(),
            )),
        }
    }

    async fn embed_gemini(&self, api_key: &SecretString, text: &str) -> Result<Vec<f32>> {
        #[derive(serde::Deserialize)]
        struct EmbedResponse {
            embedding: EmbeddingValues,
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingValues {
            values: Vec<f32>,
        }

        let request = serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
        });

        let response = self
            .client
            .post(format!("{GEMINI_API_BASE}/models/{}:embedContent", self.model))
            .query(&[("key", api_key.expose_secret())])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("Gemini embedding error {status}: {body}")));
        }

        let result: EmbedResponse = response.json().await?;
        Ok(result.embedding.values)
    }

    async fn embed_ollama(&self, base_url: &str, text: &str) -> Result<Vec<f32>> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(serde::Deserialize)]
        struct EmbedResponse {
            embedding: Vec<f32>,
        }

        let response = self
            .client
            .post(format!("{base_url}/api/embeddings"))
            .json(&EmbedRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("Ollama embedding error {status}: {body}")));
        }

        let result: EmbedResponse = response.json().await?;
        Ok(result.embedding)
    }

    /// Serialize embedding to bytes for `SQLite` storage
    #[must_use]
    pub fn to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
                f32::from_le_bytes(arr)
            })
            .collect()
    }
}

#[async_trait]
impl Embed for Embedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = match &self.backend {
            Backend::Gemini { api_key } => self.embed_gemini(api_key, text).await?,
            Backend::Ollama { base_url } => self.embed_ollama(base_url, text).await?,
        };

        if embedding.is_empty() {
            return Err(Error::Embedding("empty embedding response".to_string()));
        }

        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_roundtrip() {
        let embedding = vec![1.0, 2.5, -3.25, 0.0, 100.0];
        let bytes = Embedder::to_bytes(&embedding);
        assert_eq!(bytes.len(), embedding.len() * 4);

        let restored = Embedder::from_bytes(&bytes);
        assert_eq!(embedding, restored);
    }

    #[test]
    fn test_empty_api_key() {
        let result = Embedder::gemini(&SecretString::from(String::new()), "text-embedding-004");
        assert!(result.is_err());
    }

    #[test]
    fn test_ollama_trims_trailing_slash() {
        let embedder = Embedder::ollama("http://localhost:11434/", "nomic-embed-text");
        match embedder.backend {
            Backend::Ollama { base_url } => assert_eq!(base_url, "http://localhost:11434"),
            Backend::Gemini { .. } => panic!("expected ollama backend"),
        }
    }
}
