//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use uuid::Uuid;

use vesper_agent::agenda::CalendarEntry;
use vesper_agent::feedback::{Feedback, FeedbackSignal};
use vesper_agent::llm::{TextGenerator, TextStream};
use vesper_agent::prompt::Prompt;
use vesper_agent::voice::{KeywordModel, Microphone, SpeechSynthesizer, Transcriber, VoiceParams};
use vesper_agent::{DbPool, Error, Event, EventHandler, EventKind, Result, db};

/// Microphone rate used by scripted captures
pub const MIC_RATE: u32 = 48000;

/// Spotter and recorder rate
pub const SPEECH_RATE: u32 = 16000;

/// Spotter frame length at [`SPEECH_RATE`]
pub const SPOTTER_FRAME: usize = 512;

/// Microphone frame length that resamples to one spotter frame
pub const MIC_FRAME: usize = 1536;

/// Constant sample value the marker model treats as the wake phrase
pub const WAKE_MARKER: i16 = 1234;

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// One microphone frame of the wake marker
#[must_use]
pub fn wake_frame() -> Vec<i16> {
    vec![WAKE_MARKER; MIC_FRAME]
}

/// One microphone frame of loud alternating speech
#[must_use]
pub fn speech_frame() -> Vec<i16> {
    (0..MIC_FRAME)
        .map(|i| if i % 2 == 0 { 8000 } else { -8000 })
        .collect()
}

/// One microphone frame of silence
#[must_use]
pub fn silent_frame() -> Vec<i16> {
    vec![0; MIC_FRAME]
}

/// Replays fixed frames, then reports a device failure
pub struct ScriptedMicrophone {
    frames: std::vec::IntoIter<Vec<i16>>,
    repeat_silence: bool,
}

impl ScriptedMicrophone {
    /// Play `frames` once, then fail
    #[must_use]
    pub fn new(frames: Vec<Vec<i16>>) -> Self {
        Self {
            frames: frames.into_iter(),
            repeat_silence: false,
        }
    }

    /// Produce silence forever
    #[must_use]
    pub fn silent() -> Self {
        Self {
            frames: Vec::new().into_iter(),
            repeat_silence: true,
        }
    }
}

impl Microphone for ScriptedMicrophone {
    fn sample_rate(&self) -> u32 {
        MIC_RATE
    }

    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()> {
        if let Some(next) = self.frames.next() {
            frame.copy_from_slice(&next);
            return Ok(());
        }
        if self.repeat_silence {
            std::thread::sleep(Duration::from_millis(1));
            frame.fill(0);
            return Ok(());
        }
        Err(Error::Device("script exhausted".to_string()))
    }
}

/// Matches any frame made entirely of [`WAKE_MARKER`]
#[derive(Default)]
pub struct MarkerKeywordModel;

impl KeywordModel for MarkerKeywordModel {
    fn frame_length(&self) -> usize {
        SPOTTER_FRAME
    }

    fn sample_rate(&self) -> u32 {
        SPEECH_RATE
    }

    fn process(&mut self, frame: &[i16]) -> Result<Option<usize>> {
        Ok(frame.iter().all(|&s| s == WAKE_MARKER).then_some(0))
    }
}

/// Returns a fixed transcript and counts finalize calls
pub struct FixedTranscriber {
    text: String,
    buffered: usize,
    pub calls: Arc<AtomicUsize>,
}

impl FixedTranscriber {
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            buffered: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Transcriber for FixedTranscriber {
    fn sample_rate(&self) -> u32 {
        SPEECH_RATE
    }

    fn reset(&mut self) {
        self.buffered = 0;
    }

    fn process_audio(&mut self, frame: &[i16]) {
        self.buffered += frame.len();
    }

    fn has_minimum_audio(&self) -> bool {
        self.buffered > 0
    }

    fn buffered_audio_duration_ms(&self) -> u64 {
        (self.buffered as u64 * 1000) / u64::from(SPEECH_RATE)
    }

    fn transcription(&mut self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.buffered = 0;
        Ok(self.text.clone())
    }
}

/// Collects every feedback signal
#[derive(Default)]
pub struct RecordingFeedback {
    signals: Mutex<Vec<FeedbackSignal>>,
}

impl RecordingFeedback {
    #[must_use]
    pub fn signals(&self) -> Vec<FeedbackSignal> {
        self.signals.lock().unwrap().clone()
    }
}

impl Feedback for RecordingFeedback {
    fn notify(&self, signal: FeedbackSignal) {
        self.signals.lock().unwrap().push(signal);
    }
}

/// Records spoken sentences, sleeping a per-sentence latency first
#[derive(Default)]
pub struct RecordingSynth {
    latencies: HashMap<String, Duration>,
    spoken: Mutex<Vec<String>>,
}

impl RecordingSynth {
    /// Delay speaking `text` by `latency`
    #[must_use]
    pub fn with_latency(mut self, text: &str, latency: Duration) -> Self {
        self.latencies.insert(text.to_string(), latency);
        self
    }

    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynth {
    async fn speak(&self, text: &str, _voice: &VoiceParams) -> Result<()> {
        if let Some(latency) = self.latencies.get(text) {
            tokio::time::sleep(*latency).await;
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Streams fixed fragments and records the prompts it was given
#[derive(Default)]
pub struct ScriptedGenerator {
    fragments: Vec<String>,
    fail_after: bool,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    /// End the stream with an error after the fragments
    #[must_use]
    pub const fn failing(mut self) -> Self {
        self.fail_after = true;
        self
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate_stream(&self, prompt: &Prompt) -> Result<TextStream> {
        self.prompts.lock().unwrap().push(prompt.clone());

        let mut items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        if self.fail_after {
            items.push(Err(Error::Llm("connection reset".to_string())));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

/// Event handler that records calls and fails chosen kinds
#[derive(Default)]
pub struct RecordingHandler {
    failing: Vec<&'static str>,
    pub handled: Mutex<Vec<String>>,
    pub reverted: Mutex<Vec<Uuid>>,
}

impl RecordingHandler {
    /// Fail every event whose label is in `labels`
    #[must_use]
    pub fn failing(labels: &[&'static str]) -> Self {
        Self {
            failing: labels.to_vec(),
            ..Self::default()
        }
    }

    fn outcome(&self, label: &'static str, detail: String) -> Result<()> {
        self.handled.lock().unwrap().push(detail);
        if self.failing.contains(&label) {
            Err(Error::Handler(format!("{label} failed")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_wake_word(&self, transcript: &str) -> Result<()> {
        self.outcome("wake_word", format!("wake_word:{transcript}"))
    }

    async fn on_calendar_alert(&self, entry: &CalendarEntry) -> Result<()> {
        self.outcome("calendar_alert", format!("calendar_alert:{}", entry.title))
    }

    async fn on_initiative(&self, desire_id: Uuid) -> Result<()> {
        self.outcome("initiative", format!("initiative:{desire_id}"))
    }

    async fn on_planned_action(&self, action_id: Uuid) -> Result<()> {
        self.outcome("planned_action", format!("planned_action:{action_id}"))
    }

    fn revert(&self, event: &Event) {
        let id = match &event.kind {
            EventKind::Initiative { desire_id } => *desire_id,
            EventKind::PlannedAction { action_id } => *action_id,
            EventKind::WakeWord { .. } | EventKind::CalendarAlert { .. } => event.id,
        };
        self.reverted.lock().unwrap().push(id);
    }
}
