//! Turn orchestration: listen, transcribe, think, speak

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use super::control::SessionControl;
use super::phrases::{LocaleMessages, TerminationPhrases};
use super::state::{Event, SessionState};
use crate::agent::LanguageModel;
use crate::config::{Config, PersonaConfig, PhraseConfig, SessionConfig, VoiceConfig};
use crate::context::{RollingHistory, SessionContext, compose_system_prompt, format_recall};
use crate::db::{MemoryStore, TurnRole};
use crate::voice::{
    AudioInput, AudioOutput, Capture, CaptureLimits, PlaybackOutcome, Recognition, Synthesizer,
    Transcriber,
};
use crate::{Error, Result};

/// Consecutive capture failures before the voice loop gives up
const MAX_CAPTURE_FAILURES: u32 = 3;

/// Knobs for one orchestrated session
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub system_prompt: String,
    /// Recognition languages, tried in order
    pub languages: Vec<String>,
    pub tts_language: String,
    pub limits: CaptureLimits,
    pub stt_timeout: Duration,
    pub llm_timeout: Duration,
    pub history_cap: usize,
    pub recall_limit: usize,
    /// Where synthesized speech is written before playback
    pub artifact_path: PathBuf,
    pub termination: TerminationPhrases,
    pub messages: LocaleMessages,
}

impl OrchestratorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::from_parts(
            &config.persona,
            &config.voice,
            config.session,
            &config.phrases,
            config.llm.timeout,
            config.artifact_path(),
        )
    }

    /// Built-in defaults, writing speech to `artifact_path`
    #[must_use]
    pub fn with_defaults(artifact_path: impl Into<PathBuf>) -> Self {
        Self::from_parts(
            &PersonaConfig::default(),
            &VoiceConfig::default(),
            SessionConfig::default(),
            &PhraseConfig::default(),
            Duration::from_secs(60),
            artifact_path.into(),
        )
    }

    fn from_parts(
        persona: &PersonaConfig,
        voice: &VoiceConfig,
        session: SessionConfig,
        phrases: &PhraseConfig,
        llm_timeout: Duration,
        artifact_path: PathBuf,
    ) -> Self {
        Self {
            system_prompt: persona.system_prompt.clone(),
            languages: voice.languages.clone(),
            tts_language: voice.tts_language.clone(),
            limits: CaptureLimits {
                listen_timeout: voice.listen_timeout,
                phrase_time_limit: voice.phrase_time_limit,
            },
            stt_timeout: voice.stt_timeout,
            llm_timeout,
            history_cap: session.history_cap,
            recall_limit: session.recall_limit,
            artifact_path,
            termination: TerminationPhrases::new(&phrases.termination),
            messages: LocaleMessages::from(phrases),
        }
    }
}

/// Remote services a session talks to
#[derive(Clone)]
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub model: Arc<dyn LanguageModel>,
}

/// What one turn produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Silence, an aborted capture, or audio no language recognized
    NoSpeech,
    /// Empty text input; the canned reply was given without the model
    NotHeard { message: String },
    Replied {
        utterance: String,
        reply: String,
        /// The model failed and the fallback message was used
        fallback: bool,
    },
    /// A termination phrase ended the session
    Farewell { message: String },
    /// Shutdown was requested before or during the turn
    Cancelled,
}

/// Deletes the synthesized audio file when dropped
struct ArtifactGuard<'a> {
    path: &'a Path,
}

impl Drop for ArtifactGuard<'_> {
    fn drop(&mut self) {
        match std::fs::remove_file(self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove speech artifact");
            }
        }
    }
}

/// Drives one user's conversation through [`SessionState`]
///
/// Audio devices are optional: without an input only [`Self::handle_text`]
/// works, and without an output replies are returned but not played.
pub struct Orchestrator {
    user_id: String,
    settings: OrchestratorSettings,
    memory: MemoryStore,
    services: Services,
    input: Option<Box<dyn AudioInput>>,
    output: Option<Box<dyn AudioOutput>>,
    history: RollingHistory,
    control: SessionControl,
    state_tx: watch::Sender<SessionState>,
}

impl Orchestrator {
    /// Start a session from the context built at login
    #[must_use]
    pub fn new(
        context: SessionContext,
        settings: OrchestratorSettings,
        memory: MemoryStore,
        services: Services,
    ) -> Self {
        let history = RollingHistory::seeded(context.messages, settings.history_cap);
        let (state_tx, _rx) = watch::channel(SessionState::Idle);

        tracing::debug!(
            user = %context.user_id,
            seeded = history.len(),
            origin = ?context.origin,
            "orchestrator created"
        );

        Self {
            user_id: context.user_id,
            settings,
            memory,
            services,
            input: None,
            output: None,
            history,
            control: SessionControl::new(),
            state_tx,
        }
    }

    #[must_use]
    pub fn with_input(mut self, input: Box<dyn AudioInput>) -> Self {
        self.input = Some(input);
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: Box<dyn AudioOutput>) -> Self {
        self.output = Some(output);
        self
    }

    /// Share an externally owned control handle (e.g. wired to Ctrl-C)
    #[must_use]
    pub fn with_control(mut self, control: SessionControl) -> Self {
        self.control = control;
        self
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub const fn history(&self) -> &RollingHistory {
        &self.history
    }

    #[must_use]
    pub const fn control(&self) -> &SessionControl {
        &self.control
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn transition(&self, event: Event) {
        let current = self.state();
        match current.on(event) {
            Some(next) => {
                tracing::debug!(from = %current, to = %next, ?event, "state transition");
                self.state_tx.send_replace(next);
            }
            None => {
                tracing::warn!(state = %current, ?event, "ignored invalid transition");
            }
        }
    }

    fn enter_shutdown(&self) {
        if !self.state().is_terminal() {
            self.transition(Event::Shutdown);
        }
    }

    /// Persist and speak the welcome message
    pub async fn greet(&mut self) -> String {
        let greeting = self.settings.messages.greeting(&self.user_id);
        if self.control.is_shutdown() {
            return greeting;
        }

        self.transition(Event::Greet);
        self.persist(&greeting, TurnRole::Assistant).await;
        self.speak(&greeting).await;
        self.transition(Event::PlaybackFinished);

        greeting
    }

    /// Run one voice turn
    ///
    /// # Errors
    ///
    /// Returns error if no input device is attached or capture fails.
    /// Service failures are absorbed into the outcome.
    pub async fn run_turn(&mut self) -> Result<TurnOutcome> {
        if self.control.is_shutdown() {
            self.enter_shutdown();
            return Ok(TurnOutcome::Cancelled);
        }

        if self.input.is_none() {
            return Err(Error::Audio("no audio input attached".to_string()));
        }

        let limits = self.settings.limits;
        let stop = self.control.stop_signal();
        self.transition(Event::BeginCapture);

        let capture = match self.input.as_mut() {
            Some(input) => input.record(limits, &stop).await,
            None => Err(Error::Audio("audio input detached".to_string())),
        };

        let wav = match capture {
            Ok(Capture::Utterance(wav)) => wav,
            Ok(Capture::Silence) => {
                tracing::debug!("no speech before listen timeout");
                self.transition(Event::CaptureAborted);
                return Ok(TurnOutcome::NoSpeech);
            }
            Ok(Capture::Stopped) => {
                self.transition(Event::CaptureAborted);
                if self.control.is_shutdown() {
                    self.enter_shutdown();
                    return Ok(TurnOutcome::Cancelled);
                }
                return Ok(TurnOutcome::NoSpeech);
            }
            Err(e) => {
                self.transition(Event::CaptureAborted);
                return Err(e);
            }
        };

        if self.control.is_shutdown() {
            self.transition(Event::CaptureAborted);
            self.enter_shutdown();
            return Ok(TurnOutcome::Cancelled);
        }

        self.transition(Event::CaptureComplete);

        let Some(utterance) = self.recognize(&wav).await else {
            self.transition(Event::NothingRecognized);
            return Ok(TurnOutcome::NoSpeech);
        };

        if self.control.is_shutdown() {
            tracing::debug!("shutdown during transcription, dropping utterance");
            self.enter_shutdown();
            return Ok(TurnOutcome::Cancelled);
        }

        tracing::info!(user = %self.user_id, utterance = %utterance, "heard");

        if self.settings.termination.matches(&utterance) {
            return Ok(self.farewell().await);
        }

        self.transition(Event::Recognized);
        Ok(self.respond(utterance).await)
    }

    /// Handle one typed utterance
    pub async fn handle_text(&mut self, text: &str) -> TurnOutcome {
        if self.control.is_shutdown() {
            self.enter_shutdown();
            return TurnOutcome::Cancelled;
        }

        self.transition(Event::TextSubmitted);

        let text = text.trim();
        if text.is_empty() {
            let message = self.settings.messages.not_heard.clone();
            self.transition(Event::ReplyReady);
            self.speak(&message).await;
            self.transition(Event::PlaybackFinished);
            return TurnOutcome::NotHeard { message };
        }

        if self.settings.termination.matches(text) {
            return self.farewell().await;
        }

        self.respond(text.to_string()).await
    }

    /// Loop voice turns until shutdown or a farewell
    ///
    /// # Errors
    ///
    /// Returns the last capture error after repeated consecutive failures
    pub async fn run(&mut self) -> Result<()> {
        let mut failures = 0u32;

        loop {
            if self.control.is_shutdown() || self.state().is_terminal() {
                self.enter_shutdown();
                break;
            }

            match self.run_turn().await {
                Ok(TurnOutcome::Farewell { .. } | TurnOutcome::Cancelled) => break,
                Ok(_) => failures = 0,
                Err(e) => {
                    failures += 1;
                    tracing::error!(error = %e, failures, "capture failed");
                    if failures >= MAX_CAPTURE_FAILURES {
                        self.enter_shutdown();
                        return Err(e);
                    }
                }
            }
        }

        tracing::info!(user = %self.user_id, "session ended");
        Ok(())
    }

    /// Try each configured language until one yields text
    async fn recognize(&self, wav: &[u8]) -> Option<String> {
        for language in &self.settings.languages {
            let attempt = tokio::time::timeout(
                self.settings.stt_timeout,
                self.services.transcriber.transcribe(wav, language),
            )
            .await;

            match attempt {
                Ok(Ok(Recognition::Text(text))) => return Some(text),
                Ok(Ok(Recognition::Unrecognized)) => {
                    tracing::debug!(language = %language, "nothing recognized");
                }
                Ok(Err(e)) => {
                    tracing::warn!(language = %language, error = %e, "transcription failed");
                }
                Err(_) => {
                    tracing::warn!(language = %language, "transcription timed out");
                }
            }
        }
        None
    }

    async fn farewell(&mut self) -> TurnOutcome {
        let message = self.settings.messages.farewell.clone();
        tracing::info!(user = %self.user_id, "termination phrase heard");

        self.transition(Event::ReplyReady);
        self.persist(&message, TurnRole::Assistant).await;
        self.speak(&message).await;
        self.transition(Event::PlaybackFinished);

        self.control.shutdown();
        self.enter_shutdown();

        TurnOutcome::Farewell { message }
    }

    /// Think, persist, and speak a reply to `utterance`
    async fn respond(&mut self, utterance: String) -> TurnOutcome {
        let (reply, fallback) = self.think(&utterance).await;

        self.persist(&utterance, TurnRole::Human).await;
        self.persist(&reply, TurnRole::Assistant).await;
        self.history.push_exchange(utterance.clone(), reply.clone());

        self.transition(Event::ReplyReady);
        if !self.control.is_shutdown() {
            self.speak(&reply).await;
        }
        self.transition(Event::PlaybackFinished);

        if self.control.is_shutdown() {
            self.enter_shutdown();
        }

        TurnOutcome::Replied {
            utterance,
            reply,
            fallback,
        }
    }

    /// Ask the model, falling back to the canned message on any failure
    async fn think(&self, utterance: &str) -> (String, bool) {
        let recall = self.recall(utterance).await;
        let system = compose_system_prompt(&self.settings.system_prompt, &recall);
        let history = self.history.messages();

        let attempt = tokio::time::timeout(
            self.settings.llm_timeout,
            self.services.model.complete(&system, &history, utterance),
        )
        .await;

        match attempt {
            Ok(Ok(reply)) if !reply.trim().is_empty() => (reply.trim().to_string(), false),
            Ok(Ok(_)) => {
                tracing::warn!("model returned an empty reply");
                (self.settings.messages.fallback.clone(), true)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "model call failed");
                (self.settings.messages.fallback.clone(), true)
            }
            Err(_) => {
                tracing::error!(timeout = ?self.settings.llm_timeout, "model call timed out");
                (self.settings.messages.fallback.clone(), true)
            }
        }
    }

    /// Earlier turns similar to `utterance` that are no longer in the window
    async fn recall(&self, utterance: &str) -> String {
        if self.settings.recall_limit == 0 {
            return String::new();
        }

        match self
            .memory
            .search_similar(&self.user_id, utterance, self.settings.recall_limit)
            .await
        {
            Ok(recalled) => {
                let recalled: Vec<_> = recalled
                    .into_iter()
                    .filter(|r| !self.history.contains_content(&r.turn.content))
                    .collect();
                format_recall(&recalled)
            }
            Err(e) => {
                tracing::debug!(error = %e, "recall skipped");
                String::new()
            }
        }
    }

    async fn persist(&self, text: &str, role: TurnRole) {
        if let Err(e) = self
            .memory
            .append_turn(&self.user_id, text, role, Utc::now())
            .await
        {
            tracing::error!(user = %self.user_id, %role, error = %e, "failed to store turn");
        }
    }

    /// Synthesize and play `text`; failures are logged, never raised
    async fn speak(&mut self, text: &str) {
        let Some(output) = self.output.as_mut() else {
            return;
        };

        let stop = self.control.stop_signal();
        let language = self.settings.tts_language.as_str();

        let audio = match self.services.synthesizer.synthesize(text, language).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(error = %e, "speech synthesis failed");
                return;
            }
        };

        let path = self.settings.artifact_path.as_path();
        let _guard = ArtifactGuard { path };

        if let Err(e) = tokio::fs::write(path, &audio).await {
            tracing::error!(path = %path.display(), error = %e, "failed to write speech artifact");
            return;
        }

        match output.play_file(path, &stop).await {
            Ok(PlaybackOutcome::Completed) => {}
            Ok(PlaybackOutcome::Interrupted) => tracing::info!("playback interrupted"),
            Err(e) => tracing::error!(error = %e, "playback failed"),
        }
    }
}
