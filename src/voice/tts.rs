//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{Config, TtsBackend};
use crate::{Error, Result};

/// Google Translate speech endpoint
const GOOGLE_TTS_URL: &str = "https://translate.google.com/translate_tts";

/// Longest text the Google endpoint accepts per request (characters)
const GOOGLE_MAX_CHARS: usize = 100;

/// Turns reply text into audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` in `language` (e.g. "te"), returning MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;
}

#[derive(Debug)]
enum Provider {
    Google,
    OpenAI {
        api_key: SecretString,
        voice: String,
        speed: f32,
        model: String,
    },
}

/// Synthesizes speech over HTTP
#[derive(Debug)]
pub struct TextToSpeech {
    client: reqwest::Client,
    provider: Provider,
}

impl TextToSpeech {
    /// Create a TTS instance using the key-less Google Translate endpoint
    #[must_use]
    pub fn new_google() -> Self {
        Self {
            client: reqwest::Client::new(),
            provider: Provider::Google,
        }
    }

    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: &SecretString, voice: String, speed: f32) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            provider: Provider::OpenAI {
                api_key: SecretString::from(api_key.expose_secret().to_owned()),
                voice,
                speed,
                model: "tts-1".to_string(),
            },
        })
    }

    /// Build the configured TTS backend
    ///
    /// # Errors
    ///
    /// Returns error if the `OpenAI` backend is selected without a key
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.voice.tts_backend {
            TtsBackend::Google => Ok(Self::new_google()),
            TtsBackend::OpenAI => {
                let key = config.api_keys.openai.as_ref().ok_or_else(|| {
                    Error::Config("OPENAI_API_KEY is required for OpenAI speech synthesis".to_string())
                })?;
                Self::new_openai(key, config.voice.tts_voice.clone(), config.voice.tts_speed)
            }
        }
    }

    /// Synthesize using Google Translate, one request per chunk
    async fn synthesize_google(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        let chunks = split_for_google(text, GOOGLE_MAX_CHARS);
        let total = chunks.len();
        let mut audio = Vec::new();

        for (idx, chunk) in chunks.iter().enumerate() {
            let total_str = total.to_string();
            let idx_str = idx.to_string();
            let len_str = chunk.chars().count().to_string();

            let response = self
                .client
                .get(GOOGLE_TTS_URL)
                .query(&[
                    ("ie", "UTF-8"),
                    ("q", chunk.as_str()),
                    ("tl", language),
                    ("client", "tw-ob"),
                    ("total", total_str.as_str()),
                    ("idx", idx_str.as_str()),
                    ("textlen", len_str.as_str()),
                ])
                .header("User-Agent", "Mozilla/5.0")
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Tts(format!("Google TTS error {status}: {body}")));
            }

            audio.extend_from_slice(&response.bytes().await?);
        }

        tracing::debug!(chunks = total, bytes = audio.len(), "google synthesis complete");
        Ok(audio)
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(
        &self,
        text: &str,
        api_key: &SecretString,
        voice: &str,
        speed: f32,
        model: &str,
    ) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model,
            input: text,
            voice,
            speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(Error::Tts("nothing to synthesize".to_string()));
        }

        match &self.provider {
            Provider::Google => self.synthesize_google(text, language).await,
            Provider::OpenAI {
                api_key,
                voice,
                speed,
                model,
            } => {
                self.synthesize_openai(text, api_key, voice, *speed, model)
                    .await
            }
        }
    }
}

/// Split text on whitespace into chunks of at most `max_chars` characters
///
/// Words longer than `max_chars` are split mid-word.
fn split_for_google(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() { word_len } else { current_len + 1 + word_len };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
