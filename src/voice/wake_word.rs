//! Wake word detection
//!
//! [`WakeWordSpotter`] enforces the frame contract of a [`KeywordModel`].
//! The bundled [`PhraseKeywordModel`] uses a hybrid approach: local energy
//! gating to find short speech bursts, then transcription to verify the phrase.

use super::dsp;
use super::stt::Transcriber;
use crate::Result;

/// Minimum speech inside a burst before it is worth verifying
const MIN_BURST_MS: u64 = 300;

/// Trailing silence that closes a burst
const BURST_SILENCE_MS: u64 = 400;

/// Bursts longer than this are not wake phrases
const MAX_BURST_MS: u64 = 3000;

/// A keyword-spotting model consuming fixed-size frames
pub trait KeywordModel: Send {
    /// Number of samples per frame the model requires
    fn frame_length(&self) -> usize;

    /// Native sample rate of the model
    fn sample_rate(&self) -> u32;

    /// Feed one frame; return the matched keyword index, if any
    ///
    /// # Errors
    ///
    /// Returns error if the model fails on this frame; the caller keeps going
    fn process(&mut self, frame: &[i16]) -> Result<Option<usize>>;

    /// Forget any partial state
    fn reset(&mut self) {}
}

/// Frame-checked front end for a [`KeywordModel`]
pub struct WakeWordSpotter {
    model: Box<dyn KeywordModel>,
}

impl WakeWordSpotter {
    /// Wrap a keyword model
    #[must_use]
    pub fn new(model: Box<dyn KeywordModel>) -> Self {
        Self { model }
    }

    /// Required frame length in samples
    #[must_use]
    pub fn frame_length(&self) -> usize {
        self.model.frame_length()
    }

    /// Native sample rate of the model
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.model.sample_rate()
    }

    /// Feed one frame and return the match index, if any
    ///
    /// # Errors
    ///
    /// Propagates model failures
    ///
    /// # Panics
    ///
    /// Panics if `frame.len()` differs from [`WakeWordSpotter::frame_length`]
    pub fn process(&mut self, frame: &[i16]) -> Result<Option<usize>> {
        assert_eq!(
            frame.len(),
            self.model.frame_length(),
            "wake word frame length mismatch"
        );
        self.model.process(frame)
    }

    /// Reset model state
    pub fn reset(&mut self) {
        self.model.reset();
    }
}

/// State of the phrase model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Inside a speech burst, accumulating
    Listening,
}

/// Energy-gated burst detector that verifies wake phrases by transcription
pub struct PhraseKeywordModel {
    wake_words: Vec<String>,
    verifier: Box<dyn Transcriber>,
    frame_length: usize,
    sample_rate: u32,
    energy_threshold: f32,
    state: DetectorState,
    burst: Vec<i16>,
    speech_ms: u64,
    silence_ms: u64,
}

impl PhraseKeywordModel {
    /// Create a phrase model
    ///
    /// `verifier` must accept audio at `sample_rate`.
    #[must_use]
    pub fn new(
        wake_words: Vec<String>,
        verifier: Box<dyn Transcriber>,
        frame_length: usize,
        sample_rate: u32,
        energy_threshold: f32,
    ) -> Self {
        let normalized: Vec<String> = wake_words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        tracing::debug!(wake_words = ?normalized, "wake word model initialized");

        Self {
            wake_words: normalized,
            verifier,
            frame_length,
            sample_rate,
            energy_threshold,
            state: DetectorState::Idle,
            burst: Vec::new(),
            speech_ms: 0,
            silence_ms: 0,
        }
    }

    /// Index of the first configured phrase contained in `transcript`
    #[must_use]
    pub fn match_phrase(&self, transcript: &str) -> Option<usize> {
        let normalized = transcript.to_lowercase();
        self.wake_words
            .iter()
            .position(|w| normalized.contains(w.as_str()))
    }

    /// The configured wake phrases, normalized
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }

    /// Current detector state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    fn verify_burst(&mut self) -> Result<Option<usize>> {
        self.verifier.reset();
        for chunk in self.burst.chunks(self.frame_length.max(1)) {
            self.verifier.process_audio(chunk);
        }
        self.burst.clear();

        let transcript = self.verifier.transcription()?;
        let matched = self.match_phrase(&transcript);

        if let Some(index) = matched {
            tracing::info!(wake_word = %self.wake_words[index], transcript = %transcript, "wake word detected");
        } else {
            tracing::trace!(transcript = %transcript, "burst did not contain a wake word");
        }

        Ok(matched)
    }

    fn clear(&mut self) {
        self.state = DetectorState::Idle;
        self.burst.clear();
        self.speech_ms = 0;
        self.silence_ms = 0;
    }
}

impl KeywordModel for PhraseKeywordModel {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn process(&mut self, frame: &[i16]) -> Result<Option<usize>> {
        let frame_ms = dsp::duration_ms(frame.len(), self.sample_rate);
        let is_speech = !dsp::is_silent(frame, self.energy_threshold);

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.burst.extend_from_slice(frame);
                    self.speech_ms = frame_ms;
                    self.silence_ms = 0;
                }
                Ok(None)
            }
            DetectorState::Listening => {
                self.burst.extend_from_slice(frame);
                if is_speech {
                    self.speech_ms += frame_ms;
                    self.silence_ms = 0;
                } else {
                    self.silence_ms += frame_ms;
                }

                if self.speech_ms + self.silence_ms > MAX_BURST_MS {
                    tracing::trace!("burst too long for a wake phrase, resetting");
                    self.clear();
                    return Ok(None);
                }

                if self.silence_ms < BURST_SILENCE_MS {
                    return Ok(None);
                }

                let result = if self.speech_ms >= MIN_BURST_MS {
                    self.verify_burst()
                } else {
                    Ok(None)
                };
                self.clear();
                result
            }
        }
    }

    fn reset(&mut self) {
        self.clear();
        self.verifier.reset();
    }
}
