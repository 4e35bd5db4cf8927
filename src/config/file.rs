//! TOML configuration file loading
//!
//! Supports `~/.config/bujji/config.toml` as a persistent config source.
//! All fields are optional. The file is a partial overlay on top of defaults,
//! and environment variables win over the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct BujjiConfigFile {
    /// Override for the data directory (users, memory database, audio artifacts)
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Assistant persona
    #[serde(default)]
    pub persona: PersonaFileConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Session/history configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Termination phrases and canned messages
    #[serde(default)]
    pub phrases: PhrasesFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Persona configuration
#[derive(Debug, Default, Deserialize)]
pub struct PersonaFileConfig {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    /// Locale used for canned messages and synthesis (e.g. "te")
    pub locale: Option<String>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Backend ("gemini" or "ollama")
    pub provider: Option<String>,

    /// Model identifier (e.g. "gemini-2.0-flash")
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Base URL for self-hosted backends
    pub base_url: Option<String>,
}

/// Embedding configuration
#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingFileConfig {
    /// Embedding model (e.g. "text-embedding-004")
    pub model: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT backend ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Recognition languages tried in order (e.g. `["te-IN", "en-US"]`)
    pub languages: Option<Vec<String>>,

    /// Maximum utterance length in seconds
    pub phrase_time_limit_secs: Option<f64>,

    /// How long to wait for speech to start, in seconds
    pub listen_timeout_secs: Option<f64>,

    /// STT request timeout in seconds
    pub stt_timeout_secs: Option<u64>,

    /// TTS backend ("google" or "openai")
    pub tts_provider: Option<String>,

    /// TTS language (e.g. "te")
    pub tts_language: Option<String>,

    /// TTS voice identifier (`OpenAI` only)
    pub tts_voice: Option<String>,

    /// TTS speed multiplier (`OpenAI` only)
    pub tts_speed: Option<f32>,

    /// File name of the temporary synthesized audio
    pub artifact_name: Option<String>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Maximum messages in the rolling history sent to the model
    pub history_cap: Option<usize>,

    /// Turns loaded from memory at login
    pub context_limit: Option<usize>,

    /// Similar earlier turns recalled per utterance (0 disables recall)
    pub recall_limit: Option<usize>,
}

/// Termination phrases keyed by locale, plus canned messages
#[derive(Debug, Default, Deserialize)]
pub struct PhrasesFileConfig {
    /// Locale → phrases that end the session; replaces the defaults for that locale
    #[serde(default)]
    pub termination: BTreeMap<String, Vec<String>>,

    pub greeting: Option<String>,
    pub farewell: Option<String>,
    pub fallback: Option<String>,
    pub not_heard: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub google: Option<String>,
    pub openai: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `BujjiConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> BujjiConfigFile {
    let Some(path) = config_file_path() else {
        return BujjiConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load the TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults.
pub fn load_config_file_from(path: &Path) -> BujjiConfigFile {
    if !path.exists() {
        return BujjiConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                BujjiConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            BujjiConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/bujji/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("bujji").join("config.toml"))
}
