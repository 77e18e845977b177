//! Speech endpoint detection
//!
//! Classifies the inbound audio stream into speech and non-speech regions
//! using per-frame RMS energy. Dwell times are derived from processed
//! sample counts rather than wall clock, so burst-delivered network audio
//! behaves the same as realtime audio.

use serde::{Deserialize, Serialize};

/// Endpointing configuration
#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    /// RMS energy above which a frame counts as voiced
    pub energy_threshold: f32,
    /// Sustained voiced audio required before `SpeechStart` (debounces
    /// transient noise)
    pub start_dwell_ms: u64,
    /// Sustained silence required before `SpeechEnd` (survives brief
    /// pauses mid-sentence)
    pub end_dwell_ms: u64,
    /// Hard cap on utterance length; forces `SpeechEnd` without silence
    pub max_utterance_ms: u64,
    /// Sample rate of the inbound stream
    pub sample_rate: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.015,
            start_dwell_ms: 150,
            end_dwell_ms: 600,
            max_utterance_ms: 15_000,
            sample_rate: super::DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    /// No speech in progress
    Idle,
    /// Inside a speech region
    Speaking,
}

/// Boundary events emitted by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Sustained voice activity opened a speech region
    SpeechStart,
    /// Sustained silence (or the length cap) closed the speech region
    SpeechEnd,
}

/// Energy-based speech endpoint detector
///
/// State machine: `Idle → Speaking → Idle`. Holds no cross-connection
/// state; [`reset`](Self::reset) re-arms it for a fresh stream.
#[derive(Debug)]
pub struct EndpointDetector {
    config: EndpointConfig,
    state: EndpointState,
    // consecutive voiced samples observed while Idle
    voiced_run: u64,
    // consecutive silent samples observed while Speaking
    silence_run: u64,
    // total samples observed since the region opened
    speech_samples: u64,
}

impl EndpointDetector {
    /// Create a detector with the given configuration
    #[must_use]
    pub const fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            state: EndpointState::Idle,
            voiced_run: 0,
            silence_run: 0,
            speech_samples: 0,
        }
    }

    /// Current detector state
    #[must_use]
    pub const fn state(&self) -> EndpointState {
        self.state
    }

    /// Process one frame of PCM16 samples
    ///
    /// Returns at most one boundary event per frame. Callers feed frames
    /// in stream order; a `SpeechEnd` is only ever produced after a
    /// matching `SpeechStart`.
    pub fn process(&mut self, samples: &[i16]) -> Option<EndpointEvent> {
        if samples.is_empty() {
            return None;
        }

        let energy = rms(samples);
        let voiced = energy >= self.config.energy_threshold;
        let frame_samples = samples.len() as u64;

        match self.state {
            EndpointState::Idle => {
                if voiced {
                    self.voiced_run += frame_samples;
                    if self.voiced_run >= self.samples_for(self.config.start_dwell_ms) {
                        self.state = EndpointState::Speaking;
                        self.speech_samples = self.voiced_run;
                        self.silence_run = 0;
                        self.voiced_run = 0;
                        tracing::debug!(energy, "speech start");
                        return Some(EndpointEvent::SpeechStart);
                    }
                } else {
                    self.voiced_run = 0;
                }
                None
            }
            EndpointState::Speaking => {
                self.speech_samples += frame_samples;

                if voiced {
                    self.silence_run = 0;
                } else {
                    self.silence_run += frame_samples;
                    if self.silence_run >= self.samples_for(self.config.end_dwell_ms) {
                        self.close_region();
                        tracing::debug!("speech end (silence)");
                        return Some(EndpointEvent::SpeechEnd);
                    }
                }

                if self.speech_samples >= self.samples_for(self.config.max_utterance_ms) {
                    self.close_region();
                    tracing::debug!("speech end (length cap)");
                    return Some(EndpointEvent::SpeechEnd);
                }
                None
            }
        }
    }

    /// Re-arm the detector for a fresh stream
    pub fn reset(&mut self) {
        self.state = EndpointState::Idle;
        self.voiced_run = 0;
        self.silence_run = 0;
        self.speech_samples = 0;
    }

    fn close_region(&mut self) {
        self.state = EndpointState::Idle;
        self.voiced_run = 0;
        self.silence_run = 0;
        self.speech_samples = 0;
    }

    fn samples_for(&self, ms: u64) -> u64 {
        u64::from(self.config.sample_rate) * ms / 1000
    }
}

/// Root-mean-square energy of a frame, normalized to [0, 1]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = f64::from(s) / f64::from(i16::MAX);
            normalized * normalized
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;

    fn detector() -> EndpointDetector {
        EndpointDetector::new(EndpointConfig {
            energy_threshold: 0.015,
            start_dwell_ms: 100,
            end_dwell_ms: 400,
            max_utterance_ms: 2000,
            sample_rate: RATE,
        })
    }

    fn frame_len(ms: u64) -> usize {
        usize::try_from(u64::from(RATE) * ms / 1000).unwrap()
    }

    fn speech_frame(ms: u64) -> Vec<i16> {
        // alternating square wave well above threshold
        (0..frame_len(ms))
            .map(|i| if i % 2 == 0 { 8000 } else { -8000 })
            .collect()
    }

    fn silence_frame(ms: u64) -> Vec<i16> {
        vec![0; frame_len(ms)]
    }

    #[test]
    fn detects_speech_start_after_dwell() {
        let mut det = detector();

        assert_eq!(det.process(&speech_frame(50)), None);
        assert_eq!(det.state(), EndpointState::Idle);

        assert_eq!(det.process(&speech_frame(60)), Some(EndpointEvent::SpeechStart));
        assert_eq!(det.state(), EndpointState::Speaking);
    }

    #[test]
    fn transient_noise_does_not_open_region() {
        let mut det = detector();

        assert_eq!(det.process(&speech_frame(50)), None);
        assert_eq!(det.process(&silence_frame(20)), None);
        // the run restarted, so another 50ms is still below the dwell
        assert_eq!(det.process(&speech_frame(50)), None);
        assert_eq!(det.state(), EndpointState::Idle);
    }

    #[test]
    fn silence_while_idle_emits_nothing() {
        let mut det = detector();
        for _ in 0..20 {
            assert_eq!(det.process(&silence_frame(100)), None);
        }
        assert_eq!(det.state(), EndpointState::Idle);
    }

    #[test]
    fn ends_speech_after_silence_dwell() {
        let mut det = detector();
        assert_eq!(det.process(&speech_frame(120)), Some(EndpointEvent::SpeechStart));

        assert_eq!(det.process(&silence_frame(200)), None);
        assert_eq!(det.process(&silence_frame(250)), Some(EndpointEvent::SpeechEnd));
        assert_eq!(det.state(), EndpointState::Idle);
    }

    #[test]
    fn brief_pause_does_not_end_region() {
        let mut det = detector();
        assert_eq!(det.process(&speech_frame(120)), Some(EndpointEvent::SpeechStart));

        assert_eq!(det.process(&silence_frame(200)), None);
        // voice resumes before the end dwell elapses
        assert_eq!(det.process(&speech_frame(100)), None);
        assert_eq!(det.process(&silence_frame(200)), None);
        assert_eq!(det.state(), EndpointState::Speaking);
    }

    #[test]
    fn length_cap_forces_speech_end() {
        let mut det = detector();
        assert_eq!(det.process(&speech_frame(120)), Some(EndpointEvent::SpeechStart));

        let mut ended = false;
        for _ in 0..25 {
            if det.process(&speech_frame(100)) == Some(EndpointEvent::SpeechEnd) {
                ended = true;
                break;
            }
        }
        assert!(ended);
        assert_eq!(det.state(), EndpointState::Idle);
    }

    #[test]
    fn starts_require_intervening_end() {
        let mut det = detector();
        assert_eq!(det.process(&speech_frame(120)), Some(EndpointEvent::SpeechStart));

        // continued speech never re-emits a start
        for _ in 0..5 {
            assert_eq!(det.process(&speech_frame(100)), None);
        }

        assert_eq!(det.process(&silence_frame(450)), Some(EndpointEvent::SpeechEnd));
        assert_eq!(det.process(&speech_frame(120)), Some(EndpointEvent::SpeechStart));
    }

    #[test]
    fn reset_rearms_from_speaking() {
        let mut det = detector();
        assert_eq!(det.process(&speech_frame(120)), Some(EndpointEvent::SpeechStart));

        det.reset();
        assert_eq!(det.state(), EndpointState::Idle);
        // a fresh dwell is required after reset
        assert_eq!(det.process(&speech_frame(50)), None);
        assert_eq!(det.process(&speech_frame(60)), Some(EndpointEvent::SpeechStart));
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert!(rms(&silence_frame(100)) < f32::EPSILON);
        assert!(rms(&speech_frame(100)) > 0.1);
    }

    #[test]
    fn empty_frame_is_ignored() {
        let mut det = detector();
        assert_eq!(det.process(&[]), None);
        assert_eq!(det.state(), EndpointState::Idle);
    }
}
