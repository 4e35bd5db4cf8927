//! Utterance detection
//!
//! Energy-based voice activity detection: an utterance starts with speech
//! above the energy threshold and ends after a run of silence, or when the
//! phrase length limit is reached.

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to count as an utterance (0.3s at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Silence duration that ends an utterance (0.8s at 16kHz)
const SILENCE_SAMPLES: usize = 12_800;

/// State of the utterance detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Waiting,
    /// Speech started, accumulating
    InSpeech,
    /// Utterance finished (silence or phrase limit)
    Complete,
}

/// Segments a sample stream into one utterance
#[derive(Debug)]
pub struct UtteranceDetector {
    state: DetectorState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
    max_samples: usize,
}

impl UtteranceDetector {
    /// Create a detector that cuts utterances at `max_samples`
    #[must_use]
    pub const fn new(max_samples: usize) -> Self {
        Self {
            state: DetectorState::Waiting,
            speech_buffer: Vec::new(),
            silence_counter: 0,
            max_samples,
        }
    }

    /// Feed a block of samples and return the resulting state
    pub fn process(&mut self, samples: &[f32]) -> DetectorState {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Waiting => {
                if is_speech {
                    self.state = DetectorState::InSpeech;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected");
                }
            }
            DetectorState::InSpeech => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.speech_buffer.len() >= self.max_samples {
                    self.speech_buffer.truncate(self.max_samples);
                    tracing::debug!(samples = self.speech_buffer.len(), "phrase limit reached");
                    self.state = DetectorState::Complete;
                } else if self.silence_counter > SILENCE_SAMPLES {
                    let voiced = self.speech_buffer.len() - self.silence_counter;
                    if voiced > MIN_SPEECH_SAMPLES {
                        tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                        self.state = DetectorState::Complete;
                    } else {
                        tracing::trace!("blip too short, resetting");
                        self.reset();
                    }
                }
            }
            DetectorState::Complete => {}
        }

        self.state
    }

    /// Take the captured utterance and reset for the next one
    pub fn take_utterance(&mut self) -> Vec<f32> {
        let samples = std::mem::take(&mut self.speech_buffer);
        self.reset();
        samples
    }

    /// Reset detector to waiting state
    pub fn reset(&mut self) {
        self.state = DetectorState::Waiting;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 1600;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_silence_stays_waiting() {
        let mut detector = UtteranceDetector::new(96_000);
        for _ in 0..20 {
            assert_eq!(detector.process(&[0.0; BLOCK]), DetectorState::Waiting);
        }
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut detector = UtteranceDetector::new(96_000);
        for _ in 0..5 {
            detector.process(&[0.3; BLOCK]);
        }
        assert_eq!(detector.state(), DetectorState::InSpeech);

        let mut state = DetectorState::InSpeech;
        for _ in 0..10 {
            state = detector.process(&[0.0; BLOCK]);
        }
        assert_eq!(state, DetectorState::Complete);

        let utterance = detector.take_utterance();
        assert!(utterance.len() >= 5 * BLOCK);
        assert_eq!(detector.state(), DetectorState::Waiting);
    }

    #[test]
    fn test_phrase_limit_cuts_utterance() {
        let mut detector = UtteranceDetector::new(8000);
        let mut state = DetectorState::Waiting;
        for _ in 0..10 {
            state = detector.process(&[0.3; BLOCK]);
            if state == DetectorState::Complete {
                break;
            }
        }
        assert_eq!(state, DetectorState::Complete);
        assert_eq!(detector.take_utterance().len(), 8000);
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut detector = UtteranceDetector::new(96_000);
        detector.process(&[0.3; 800]);
        for _ in 0..10 {
            detector.process(&[0.0; BLOCK]);
        }
        assert_eq!(detector.state(), DetectorState::Waiting);
    }
}
