//! Voice processing module
//!
//! Handles audio capture, utterance detection, playback, and the HTTP
//! speech services (STT and TTS).

mod capture;
mod detector;
mod playback;
pub mod stt;
pub mod tts;

pub use capture::{AudioCapture, AudioInput, Capture, CaptureLimits, CpalInput, SAMPLE_RATE, samples_to_wav};
pub use detector::{DetectorState, UtteranceDetector, calculate_energy};
pub use playback::{AudioOutput, AudioPlayback, PlaybackOutcome, decode_mp3, resample_audio};
pub use stt::{Recognition, SpeechToText, Transcriber};
pub use tts::{Synthesizer, TextToSpeech};
