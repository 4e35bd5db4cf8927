//! Audio capture from microphone

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::detector::{DetectorState, UtteranceDetector};
use crate::session::StopSignal;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How often the capture loop drains the device buffer
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bounds on a single capture
#[derive(Debug, Clone, Copy)]
pub struct CaptureLimits {
    /// Give up if no speech starts within this time
    pub listen_timeout: Duration,
    /// Maximum length of one utterance
    pub phrase_time_limit: Duration,
}

/// Result of one capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// A complete utterance as 16-bit mono WAV
    Utterance(Vec<u8>),
    /// No speech before the listen timeout
    Silence,
    /// The stop signal was raised
    Stopped,
}

/// Source of spoken utterances
#[async_trait(?Send)]
pub trait AudioInput {
    /// Record one utterance
    ///
    /// # Errors
    ///
    /// Returns error if the input device fails
    async fn record(&mut self, limits: CaptureLimits, stop: &StopSignal) -> Result<Capture>;
}

/// Captures audio from the default input device
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device at 16kHz mono
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Get captured audio buffer and clear it
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Microphone input with energy-based utterance detection
pub struct CpalInput {
    capture: AudioCapture,
}

impl CpalInput {
    /// Open the default microphone
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        Ok(Self {
            capture: AudioCapture::new()?,
        })
    }
}

#[async_trait(?Send)]
impl AudioInput for CpalInput {
    async fn record(&mut self, limits: CaptureLimits, stop: &StopSignal) -> Result<Capture> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let max_samples = (limits.phrase_time_limit.as_secs_f64() * f64::from(SAMPLE_RATE)) as usize;
        let mut detector = UtteranceDetector::new(max_samples.max(1));

        self.capture.clear_buffer();
        self.capture.start()?;
        let started = Instant::now();

        tracing::info!("listening");

        let outcome = loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            if stop.is_raised() {
                break Capture::Stopped;
            }

            let samples = self.capture.take_buffer();
            match detector.process(&samples) {
                DetectorState::Complete => {
                    let utterance = detector.take_utterance();
                    break Capture::Utterance(samples_to_wav(&utterance, SAMPLE_RATE)?);
                }
                DetectorState::Waiting if started.elapsed() > limits.listen_timeout => {
                    break Capture::Silence;
                }
                DetectorState::Waiting | DetectorState::InSpeech => {}
            }
        };

        self.capture.stop();
        Ok(outcome)
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
