//! Configuration management for Bujji

pub mod file;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};

use self::file::BujjiConfigFile;

/// Default hosted model
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Default self-hosted model
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Bujji configuration
#[derive(Debug)]
pub struct Config {
    /// Path to data directory (users, memory database, audio artifacts)
    pub data_dir: PathBuf,

    /// Assistant persona
    pub persona: PersonaConfig,

    /// Language model configuration
    pub llm: LlmConfig,

    /// Embedding model configuration
    pub embedding: EmbeddingConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Session configuration
    pub session: SessionConfig,

    /// Termination phrases and canned messages
    pub phrases: PhraseConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Persona the assistant speaks as
#[derive(Debug, Clone)]
pub struct PersonaConfig {
    pub name: String,
    pub system_prompt: String,
    pub locale: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Bujji".to_string(),
            system_prompt: "You are a Telugu speaking chatbot named Bujji. Your responses should be warm, friendly and in Telugu language.".to_string(),
            locale: "te".to_string(),
        }
    }
}

/// Language model backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    /// Hosted Google Gemini API
    #[default]
    Gemini,
    /// Self-hosted Ollama server
    Ollama,
}

impl LlmProvider {
    /// Parse from string representation
    ///
    /// # Errors
    ///
    /// Returns error for unknown providers
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" | "local" => Ok(Self::Ollama),
            other => Err(Error::Config(format!("unknown llm provider: {other}"))),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    /// Base URL for the self-hosted backend
    pub base_url: String,
}

/// Embedding configuration (backend follows `llm.provider`)
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
}

/// Speech-to-text backend
///
/// Chosen by `BUJJI_STT_PROVIDER` or `voice.stt_provider`. Whisper is the
/// default and needs `OPENAI_API_KEY`; Deepgram needs `DEEPGRAM_API_KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttBackend {
    #[default]
    Whisper,
    Deepgram,
}

/// Text-to-speech backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsBackend {
    /// Google Translate speech endpoint (no key required)
    #[default]
    Google,
    OpenAI,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_backend: SttBackend,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// Recognition languages, tried in order
    pub languages: Vec<String>,

    /// Maximum length of a single utterance
    pub phrase_time_limit: Duration,

    /// How long to wait for speech before giving up on a capture
    pub listen_timeout: Duration,

    /// STT request timeout
    pub stt_timeout: Duration,

    pub tts_backend: TtsBackend,

    /// Synthesis language (e.g. "te")
    pub tts_language: String,

    /// TTS voice identifier (`OpenAI` only)
    pub tts_voice: String,

    /// TTS speed multiplier (`OpenAI` only)
    pub tts_speed: f32,

    /// File name of the temporary synthesized audio, inside `data_dir`
    pub artifact_name: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_backend: SttBackend::Whisper,
            stt_model: "whisper-1".to_string(),
            languages: vec!["te-IN".to_string(), "en-US".to_string()],
            phrase_time_limit: Duration::from_secs(6),
            listen_timeout: Duration::from_secs(10),
            stt_timeout: Duration::from_secs(30),
            tts_backend: TtsBackend::Google,
            tts_language: "te".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            artifact_name: "temp_speech.mp3".to_string(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Maximum messages in the rolling history (5 exchange pairs)
    pub history_cap: usize,

    /// Turns loaded from memory at login
    pub context_limit: usize,

    /// Similar earlier turns recalled into the system prompt per utterance
    pub recall_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_cap: 10,
            context_limit: 10,
            recall_limit: 3,
        }
    }
}

/// Canned messages spoken without consulting the model
#[derive(Debug, Clone)]
pub struct Messages {
    /// Spoken at session start; `{user}` is replaced with the identifier
    pub greeting: String,
    pub farewell: String,
    pub fallback: String,
    pub not_heard: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            greeting: "నమస్కారం {user}!".to_string(),
            farewell: "సర్లే నువ్వు వెళ్ళి రా!".to_string(),
            fallback: "ఏదో తప్పు జరిగింది. దయచేసి మళ్ళీ ప్రయత్నించండి.".to_string(),
            not_heard: "నేను మీ మాట వినలేదు. దయచేసి మళ్ళీ చెప్పండి.".to_string(),
        }
    }
}

/// Termination phrases per locale plus canned messages
#[derive(Debug, Clone)]
pub struct PhraseConfig {
    pub termination: BTreeMap<String, Vec<String>>,
    pub messages: Messages,
}

impl Default for PhraseConfig {
    fn default() -> Self {
        let mut termination = BTreeMap::new();
        termination.insert(
            "en".to_string(),
            ["quit", "exit", "bye", "stop", "goodbye"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        );
        termination.insert(
            "te".to_string(),
            ["ఆపు", "సరే", "చాలు", "వెళ్తున్నా"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        );

        Self {
            termination,
            messages: Messages::default(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// Google API key (Gemini chat and embeddings)
    pub google: Option<SecretString>,

    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid or a required API key is missing
    pub fn load() -> Result<Self> {
        let file = file::load_config_file();
        let config = Self::from_sources(file, |key| std::env::var(key).ok())?;

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        Ok(config)
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// Environment variables take precedence over the file.
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid or a required API key is missing
    pub fn from_sources<F>(file: BujjiConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |var: &str, fallback: Option<String>| env(var).or(fallback);

        let data_dir = pick("BUJJI_DATA_DIR", file.data_dir).map_or_else(default_data_dir, PathBuf::from);

        let defaults = PersonaConfig::default();
        let persona = PersonaConfig {
            name: pick("BUJJI_PERSONA_NAME", file.persona.name).unwrap_or(defaults.name),
            system_prompt: file.persona.system_prompt.unwrap_or(defaults.system_prompt),
            locale: pick("BUJJI_LOCALE", file.persona.locale).unwrap_or(defaults.locale),
        };

        let provider = pick("BUJJI_LLM_PROVIDER", file.llm.provider)
            .map(|s| LlmProvider::parse(&s))
            .transpose()?
            .unwrap_or_default();
        let model = pick("BUJJI_LLM_MODEL", file.llm.model).unwrap_or_else(|| {
            match provider {
                LlmProvider::Gemini => DEFAULT_GEMINI_MODEL,
                LlmProvider::Ollama => DEFAULT_OLLAMA_MODEL,
            }
            .to_string()
        });
        let llm = LlmConfig {
            provider,
            model,
            temperature: file.llm.temperature.unwrap_or(0.7),
            timeout: Duration::from_secs(file.llm.timeout_secs.unwrap_or(60)),
            base_url: pick("OLLAMA_URL", file.llm.base_url)
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
        };

        let embedding = EmbeddingConfig {
            model: pick("BUJJI_EMBEDDING_MODEL", file.embedding.model).unwrap_or_else(|| {
                match provider {
                    LlmProvider::Gemini => "text-embedding-004",
                    LlmProvider::Ollama => "nomic-embed-text",
                }
                .to_string()
            }),
        };

        let voice = Self::voice_from_sources(file.voice, &env)?;

        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            history_cap: file.session.history_cap.unwrap_or(session_defaults.history_cap),
            context_limit: file
                .session
                .context_limit
                .unwrap_or(session_defaults.context_limit),
            recall_limit: file
                .session
                .recall_limit
                .unwrap_or(session_defaults.recall_limit),
        };

        let mut phrases = PhraseConfig::default();
        for (locale, list) in file.phrases.termination {
            phrases.termination.insert(locale, list);
        }
        if let Some(v) = file.phrases.greeting {
            phrases.messages.greeting = v;
        }
        if let Some(v) = file.phrases.farewell {
            phrases.messages.farewell = v;
        }
        if let Some(v) = file.phrases.fallback {
            phrases.messages.fallback = v;
        }
        if let Some(v) = file.phrases.not_heard {
            phrases.messages.not_heard = v;
        }

        let api_keys = ApiKeys {
            google: pick("GOOGLE_API_KEY", file.api_keys.google)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            openai: pick("OPENAI_API_KEY", file.api_keys.openai)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            deepgram: pick("DEEPGRAM_API_KEY", file.api_keys.deepgram)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        let config = Self {
            data_dir,
            persona,
            llm,
            embedding,
            voice,
            session,
            phrases,
            api_keys,
        };
        config.validate()?;

        Ok(config)
    }

    fn voice_from_sources<F>(file: file::VoiceFileConfig, env: &F) -> Result<VoiceConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = VoiceConfig::default();

        let stt_backend = match env("BUJJI_STT_PROVIDER").or(file.stt_provider).as_deref() {
            None => defaults.stt_backend,
            Some(s) => match s.trim().to_lowercase().as_str() {
                "whisper" | "openai" => SttBackend::Whisper,
                "deepgram" => SttBackend::Deepgram,
                other => return Err(Error::Config(format!("unknown stt provider: {other}"))),
            },
        };
        let tts_backend = match env("BUJJI_TTS_PROVIDER").or(file.tts_provider).as_deref() {
            None => defaults.tts_backend,
            Some(s) => match s.trim().to_lowercase().as_str() {
                "google" | "gtts" => TtsBackend::Google,
                "openai" => TtsBackend::OpenAI,
                other => return Err(Error::Config(format!("unknown tts provider: {other}"))),
            },
        };

        let stt_model = env("BUJJI_STT_MODEL").or(file.stt_model).unwrap_or_else(|| {
            match stt_backend {
                SttBackend::Whisper => "whisper-1",
                SttBackend::Deepgram => "nova-2",
            }
            .to_string()
        });

        let languages = file
            .languages
            .filter(|l| !l.is_empty())
            .unwrap_or(defaults.languages);

        let phrase_time_limit = file
            .phrase_time_limit_secs
            .map(secs_to_duration)
            .transpose()?
            .unwrap_or(defaults.phrase_time_limit);
        let listen_timeout = file
            .listen_timeout_secs
            .map(secs_to_duration)
            .transpose()?
            .unwrap_or(defaults.listen_timeout);

        Ok(VoiceConfig {
            stt_backend,
            stt_model,
            languages,
            phrase_time_limit,
            listen_timeout,
            stt_timeout: file
                .stt_timeout_secs
                .map_or(defaults.stt_timeout, Duration::from_secs),
            tts_backend,
            tts_language: file.tts_language.unwrap_or(defaults.tts_language),
            tts_voice: file.tts_voice.unwrap_or(defaults.tts_voice),
            tts_speed: file.tts_speed.unwrap_or(defaults.tts_speed),
            artifact_name: file.artifact_name.unwrap_or(defaults.artifact_name),
        })
    }

    /// Check that every selected backend has the credentials it needs
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the missing key
    pub fn validate(&self) -> Result<()> {
        if self.llm.provider == LlmProvider::Gemini && self.api_keys.google.is_none() {
            return Err(Error::Config(
                "GOOGLE_API_KEY is required for the gemini backend".to_string(),
            ));
        }
        if self.voice.stt_backend == SttBackend::Whisper && self.api_keys.openai.is_none() {
            return Err(Error::Config(
                "OPENAI_API_KEY is required for Whisper transcription \
                 (the default; set BUJJI_STT_PROVIDER or voice.stt_provider to \"deepgram\" to switch)"
                    .to_string(),
            ));
        }
        if self.voice.stt_backend == SttBackend::Deepgram && self.api_keys.deepgram.is_none() {
            return Err(Error::Config(
                "DEEPGRAM_API_KEY is required for Deepgram transcription".to_string(),
            ));
        }
        if self.voice.tts_backend == TtsBackend::OpenAI && self.api_keys.openai.is_none() {
            return Err(Error::Config(
                "OPENAI_API_KEY is required for OpenAI speech synthesis".to_string(),
            ));
        }
        if self.session.history_cap == 0 {
            return Err(Error::Config("session.history_cap must be positive".to_string()));
        }
        if self.voice.languages.is_empty() {
            return Err(Error::Config("voice.languages must not be empty".to_string()));
        }
        Ok(())
    }

    /// Path of the users directory holding one credential file per user
    #[must_use]
    pub fn users_dir(&self) -> PathBuf {
        self.data_dir.join("users")
    }

    /// Path of the memory database
    #[must_use]
    pub fn memory_db_path(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }

    /// Path of the temporary synthesized audio
    #[must_use]
    pub fn artifact_path(&self) -> PathBuf {
        self.data_dir.join(&self.voice.artifact_name)
    }
}

/// Determine data directory (`~/.local/share/bujji` on Linux)
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "bujji", "bujji")
        .map_or_else(|| PathBuf::from("user_data"), |d| d.data_dir().to_path_buf())
}

fn secs_to_duration(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::Config(format!("invalid duration {secs}: {e}")))
}
