//! Audio playback to speakers

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::session::StopSignal;
use crate::{Error, Result};

/// How often playback checks for completion or a stop request
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Interrupted,
}

/// Sink for synthesized speech
#[async_trait(?Send)]
pub trait AudioOutput {
    /// Play an MP3 file until it ends or `stop` is raised
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded, or the device fails
    async fn play_file(&mut self, path: &Path, stop: &StopSignal) -> Result<PlaybackOutcome>;
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    device: Device,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self { device })
    }

    /// Pick an output config for `sample_rate`, preferring mono
    ///
    /// Falls back to the device default when the rate is unsupported.
    fn config_for(&self, sample_rate: u32) -> Result<StreamConfig> {
        let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        };

        let exact = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                self.device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| supports(c, 2))
            });

        if let Some(range) = exact {
            return Ok(range.with_sample_rate(SampleRate(sample_rate)).config());
        }

        self.device
            .default_output_config()
            .map(|c| c.config())
            .map_err(|e| Error::Audio(e.to_string()))
    }

    /// Play mono samples, returning early if `stop` is raised
    ///
    /// # Errors
    ///
    /// Returns error if the output stream fails
    pub async fn play_samples(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
        stop: &StopSignal,
    ) -> Result<PlaybackOutcome> {
        if samples.is_empty() {
            return Ok(PlaybackOutcome::Completed);
        }

        let config = self.config_for(sample_rate)?;
        let samples = if config.sample_rate.0 == sample_rate {
            samples
        } else {
            tracing::debug!(from = sample_rate, to = config.sample_rate.0, "resampling for output");
            resample_audio(&samples, sample_rate, config.sample_rate.0)?
        };

        let channels = usize::from(config.channels);
        let sample_count = samples.len();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_cb = Arc::clone(&finished);
        let mut position = 0usize;

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(position).copied().unwrap_or_else(|| {
                            finished_cb.store(true, Ordering::Release);
                            0.0
                        });
                        frame.fill(sample);
                        position = (position + 1).min(samples.len());
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(config.sample_rate.0);
        let deadline = Duration::from_millis(duration_ms + 500);
        let start = Instant::now();

        let outcome = loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            if stop.is_raised() {
                break PlaybackOutcome::Interrupted;
            }
            if finished.load(Ordering::Acquire) || start.elapsed() > deadline {
                break PlaybackOutcome::Completed;
            }
        };

        drop(stream);
        tracing::debug!(samples = sample_count, ?outcome, "playback ended");

        Ok(outcome)
    }
}

#[async_trait(?Send)]
impl AudioOutput for AudioPlayback {
    async fn play_file(&mut self, path: &Path, stop: &StopSignal) -> Result<PlaybackOutcome> {
        let data = tokio::fs::read(path).await?;
        let (samples, sample_rate) = decode_mp3(&data)?;
        self.play_samples(samples, sample_rate, stop).await
    }
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }

                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no MP3 frames found".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Resample mono audio using rubato
///
/// # Errors
///
/// Returns error if the resampler cannot be built
#[allow(clippy::cast_possible_truncation)]
pub fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate.max(1) as usize);

    for chunk in samples.chunks(chunk_size) {
        let mut block: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        // Pad the tail so the last partial chunk is not dropped
        block.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}
