//! Silence-terminated utterance recording

use std::time::Duration;

use super::dsp;
use super::stt::Transcriber;
use crate::Result;

/// Limits that end a recording session
#[derive(Debug, Clone, Copy)]
pub struct RecordingLimits {
    /// RMS below which a frame counts as silence
    pub silence_threshold: f32,
    /// Trailing silence that ends the utterance once speech was heard
    pub silence_timeout: Duration,
    /// Hard cap on the whole session
    pub max_duration: Duration,
    /// Speech required before the utterance is worth transcribing
    pub min_speech: Duration,
}

impl Default for RecordingLimits {
    fn default() -> Self {
        Self {
            silence_threshold: 500.0,
            silence_timeout: Duration::from_millis(1500),
            max_duration: Duration::from_secs(15),
            min_speech: Duration::from_millis(300),
        }
    }
}

/// Why a recording session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Silence ran past the timeout after speech
    Silence,
    /// The session hit its duration cap
    MaxDuration,
}

/// Progress after feeding a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    /// Keep feeding frames
    Recording,
    /// Stop reading the microphone
    Stopped(StopReason),
}

/// Metadata about the utterance being recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Utterance {
    /// Total audio fed, in milliseconds
    pub total_ms: u64,
    /// Non-silent audio fed, in milliseconds
    pub speech_ms: u64,
    /// Current run of trailing silence, in milliseconds
    pub silence_run_ms: u64,
    /// Whether any non-silent frame was seen
    pub speech_detected: bool,
}

/// Streams one utterance into a [`Transcriber`] until silence or the cap
pub struct UtteranceRecorder {
    transcriber: Box<dyn Transcriber>,
    limits: RecordingLimits,
    utterance: Utterance,
}

impl UtteranceRecorder {
    /// Create a recorder around `transcriber`
    #[must_use]
    pub fn new(transcriber: Box<dyn Transcriber>, limits: RecordingLimits) -> Self {
        Self {
            transcriber,
            limits,
            utterance: Utterance::default(),
        }
    }

    /// Sample rate frames must arrive at
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.transcriber.sample_rate()
    }

    /// Start a new session
    pub fn begin(&mut self) {
        self.transcriber.reset();
        self.utterance = Utterance::default();
    }

    /// Feed one frame at [`UtteranceRecorder::sample_rate`]
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, frame: &[i16]) -> RecordingStatus {
        let frame_ms = dsp::duration_ms(frame.len(), self.transcriber.sample_rate());
        self.transcriber.process_audio(frame);

        let u = &mut self.utterance;
        u.total_ms += frame_ms;

        if dsp::is_silent(frame, self.limits.silence_threshold) {
            u.silence_run_ms += frame_ms;
        } else {
            u.speech_detected = true;
            u.speech_ms += frame_ms;
            u.silence_run_ms = 0;
        }

        if u.total_ms >= self.limits.max_duration.as_millis() as u64 {
            return RecordingStatus::Stopped(StopReason::MaxDuration);
        }

        if u.speech_detected && u.silence_run_ms >= self.limits.silence_timeout.as_millis() as u64
        {
            return RecordingStatus::Stopped(StopReason::Silence);
        }

        RecordingStatus::Recording
    }

    /// Whether the session captured enough speech to transcribe
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn has_minimum_audio(&self) -> bool {
        self.utterance.speech_ms >= self.limits.min_speech.as_millis() as u64
            && self.transcriber.has_minimum_audio()
    }

    /// Snapshot of the session metadata
    #[must_use]
    pub const fn utterance(&self) -> Utterance {
        self.utterance
    }

    /// Finalize and return the transcript; only valid after recording stopped
    ///
    /// # Errors
    ///
    /// Propagates transcriber failures
    pub fn finish(&mut self) -> Result<String> {
        tracing::debug!(
            total_ms = self.utterance.total_ms,
            speech_ms = self.utterance.speech_ms,
            buffered_ms = self.transcriber.buffered_audio_duration_ms(),
            "finalizing utterance"
        );
        let transcript = self.transcriber.transcription()?;
        self.utterance = Utterance::default();
        Ok(transcript.trim().to_string())
    }
}
