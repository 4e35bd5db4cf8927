//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use bujji::agent::LanguageModel;
use bujji::context::ChatMessage;
use bujji::db::{self, EMBEDDING_DIM, Embed, MemoryStore};
use bujji::session::{Services, SessionControl, StopSignal};
use bujji::voice::{
    AudioInput, AudioOutput, Capture, CaptureLimits, PlaybackOutcome, Recognition, Synthesizer,
    Transcriber,
};
use bujji::{Error, Result};

/// Deterministic embedder: one-hot on a hash bucket of the text
pub struct BucketEmbedder;

#[async_trait]
impl Embed for BucketEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let bucket = text.bytes().map(usize::from).sum::<usize>() % EMBEDDING_DIM;
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[bucket] = 1.0;
        Ok(v)
    }
}

/// Set up an in-memory memory store
#[must_use]
pub fn memory_store() -> MemoryStore {
    let pool = db::init_memory().expect("failed to init test db");
    MemoryStore::new(pool, Arc::new(BucketEmbedder))
}

/// Language model that answers "reply: <prompt>" or always fails
#[derive(Default)]
pub struct FakeModel {
    pub fail: bool,
    pub calls: AtomicUsize,
    /// Size of the history window on each call
    pub history_lens: Mutex<Vec<usize>>,
}

impl FakeModel {
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, _system: &str, history: &[ChatMessage], prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history_lens.lock().unwrap().push(history.len());
        if self.fail {
            return Err(Error::Agent("model unavailable".to_string()));
        }
        Ok(format!("reply: {prompt}"))
    }
}

/// Transcriber that reads the "audio" bytes back as UTF-8 text
///
/// Only `language` recognizes anything; other languages report
/// [`Recognition::Unrecognized`].
pub struct EchoTranscriber {
    pub language: String,
    pub calls: AtomicUsize,
}

impl EchoTranscriber {
    #[must_use]
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(&self, wav: &[u8], language: &str) -> Result<Recognition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(wav).trim().to_string();
        if language != self.language || text.is_empty() {
            return Ok(Recognition::Unrecognized);
        }
        Ok(Recognition::Text(text))
    }
}

/// Synthesizer returning a fixed byte payload
#[derive(Default)]
pub struct FakeSynthesizer {
    pub spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, _language: &str) -> Result<Vec<u8>> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(b"ID3-fake-mp3".to_vec())
    }
}

/// Transcriber that requests shutdown while recognizing
pub struct ShutdownTranscriber {
    pub control: SessionControl,
}

#[async_trait]
impl Transcriber for ShutdownTranscriber {
    async fn transcribe(&self, wav: &[u8], _language: &str) -> Result<Recognition> {
        self.control.shutdown();
        Ok(Recognition::Text(String::from_utf8_lossy(wav).to_string()))
    }
}

/// Synthesizer whose backend is always down
#[derive(Default)]
pub struct FailingSynthesizer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Synthesizer for FailingSynthesizer {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Tts("service unavailable".to_string()))
    }
}

/// Input that replays scripted captures, then requests shutdown
pub struct ScriptedInput {
    captures: VecDeque<Result<Capture>>,
    control: SessionControl,
}

impl ScriptedInput {
    /// Each string becomes one utterance; an empty string is unintelligible audio
    #[must_use]
    pub fn utterances(lines: &[&str], control: SessionControl) -> Self {
        let captures = lines
            .iter()
            .map(|l| Ok(Capture::Utterance(l.as_bytes().to_vec())))
            .collect();
        Self { captures, control }
    }

    #[must_use]
    pub fn captures(captures: Vec<Result<Capture>>, control: SessionControl) -> Self {
        Self {
            captures: captures.into(),
            control,
        }
    }
}

#[async_trait(?Send)]
impl AudioInput for ScriptedInput {
    async fn record(&mut self, _limits: CaptureLimits, _stop: &StopSignal) -> Result<Capture> {
        match self.captures.pop_front() {
            Some(capture) => capture,
            None => {
                self.control.shutdown();
                Ok(Capture::Stopped)
            }
        }
    }
}

/// What the fake speaker observed for one playback
#[derive(Debug, Clone)]
pub struct Played {
    pub path: PathBuf,
    pub existed: bool,
}

/// Output that records playbacks, optionally interrupting each one
#[derive(Clone, Default)]
pub struct RecordingOutput {
    pub played: Arc<Mutex<Vec<Played>>>,
    /// Interrupt through this control instead of finishing playback
    pub interrupt_with: Option<SessionControl>,
}

impl RecordingOutput {
    #[must_use]
    pub fn played(&self) -> Vec<Played> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl AudioOutput for RecordingOutput {
    async fn play_file(&mut self, path: &Path, stop: &StopSignal) -> Result<PlaybackOutcome> {
        self.played.lock().unwrap().push(Played {
            path: path.to_path_buf(),
            existed: path.exists(),
        });

        if let Some(control) = &self.interrupt_with {
            control.interrupt();
            assert!(stop.is_raised());
            return Ok(PlaybackOutcome::Interrupted);
        }
        Ok(PlaybackOutcome::Completed)
    }
}

/// Output whose device fails on every playback
#[derive(Clone, Default)]
pub struct FailingOutput {
    pub attempts: Arc<AtomicUsize>,
}

#[async_trait(?Send)]
impl AudioOutput for FailingOutput {
    async fn play_file(&mut self, _path: &Path, _stop: &StopSignal) -> Result<PlaybackOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Audio("output device lost".to_string()))
    }
}

/// Handles to the fakes behind a [`Services`] bundle
pub struct Fakes {
    pub model: Arc<FakeModel>,
    pub transcriber: Arc<EchoTranscriber>,
    pub synthesizer: Arc<FakeSynthesizer>,
}

impl Fakes {
    /// Fakes recognizing "te-IN" speech with a working model
    #[must_use]
    pub fn new() -> Self {
        Self::with_model(FakeModel::default())
    }

    #[must_use]
    pub fn with_model(model: FakeModel) -> Self {
        Self {
            model: Arc::new(model),
            transcriber: Arc::new(EchoTranscriber::new("te-IN")),
            synthesizer: Arc::new(FakeSynthesizer::default()),
        }
    }

    #[must_use]
    pub fn services(&self) -> Services {
        Services {
            transcriber: self.transcriber.clone(),
            synthesizer: self.synthesizer.clone(),
            model: self.model.clone(),
        }
    }

    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.synthesizer.spoken.lock().unwrap().clone()
    }
}
