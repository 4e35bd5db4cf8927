//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{Config, SttBackend};
use crate::{Error, Result};

/// Outcome of transcribing one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Text(String),
    /// The service understood no speech
    Unrecognized,
}

impl Recognition {
    fn from_transcript(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Self::Unrecognized
        } else {
            Self::Text(trimmed.to_string())
        }
    }
}

/// Turns recorded speech into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio in the given BCP-47 language (e.g. "te-IN")
    ///
    /// # Errors
    ///
    /// Returns error if the service fails; unintelligible audio is
    /// [`Recognition::Unrecognized`], not an error
    async fn transcribe(&self, wav: &[u8], language: &str) -> Result<Recognition>;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes speech over HTTP (Whisper or Deepgram)
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    backend: SttBackend,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: &SecretString, model: String) -> Result<Self> {
        Self::with_backend(api_key, model, SttBackend::Whisper)
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: &SecretString, model: String) -> Result<Self> {
        Self::with_backend(api_key, model, SttBackend::Deepgram)
    }

    fn with_backend(api_key: &SecretString, model: String, backend: SttBackend) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            let name = match backend {
                SttBackend::Whisper => "OpenAI API key required for Whisper",
                SttBackend::Deepgram => "Deepgram API key required",
            };
            return Err(Error::Config(name.to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: SecretString::from(api_key.expose_secret().to_owned()),
            model,
            backend,
        })
    }

    /// Build the configured STT backend
    ///
    /// # Errors
    ///
    /// Returns error if the backend's API key is missing
    pub fn from_config(config: &Config) -> Result<Self> {
        let voice = &config.voice;
        match voice.stt_backend {
            SttBackend::Whisper => {
                let key = config.api_keys.openai.as_ref().ok_or_else(|| {
                    Error::Config("OPENAI_API_KEY is required for Whisper transcription".to_string())
                })?;
                Self::new_whisper(key, voice.stt_model.clone())
            }
            SttBackend::Deepgram => {
                let key = config.api_keys.deepgram.as_ref().ok_or_else(|| {
                    Error::Config("DEEPGRAM_API_KEY is required for Deepgram transcription".to_string())
                })?;
                Self::new_deepgram(key, voice.stt_model.clone())
            }
        }
    }

    /// Transcribe using `OpenAI` Whisper
    async fn transcribe_whisper(&self, audio: &[u8], language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), language, "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", primary_subtag(language).to_string());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8], language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), language, "starting Deepgram transcription");

        let response = self
            .client
            .post("https://api.deepgram.com/v1/listen")
            .query(&[
                ("model", self.model.as_str()),
                ("language", language),
                ("punctuate", "true"),
            ])
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;

        Ok(result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: &[u8], language: &str) -> Result<Recognition> {
        let transcript = match self.backend {
            SttBackend::Whisper => self.transcribe_whisper(wav, language).await?,
            SttBackend::Deepgram => self.transcribe_deepgram(wav, language).await?,
        };

        let recognition = Recognition::from_transcript(&transcript);
        if let Recognition::Text(ref text) = recognition {
            tracing::info!(language, transcript = %text, "transcription complete");
        }
        Ok(recognition)
    }
}

/// "te-IN" -> "te"
fn primary_subtag(language: &str) -> &str {
    language.split(['-', '_']).next().unwrap_or(language)
}
