//! Always-on listening loop
//!
//! Owns the microphone on a dedicated thread and drives
//! `Idle → Recording → Transcribing → Idle`, emitting a wake word event for
//! every utterance that yields a transcript.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use super::capture::Microphone;
use super::dsp;
use super::recorder::{RecordingStatus, UtteranceRecorder};
use super::wake_word::WakeWordSpotter;
use crate::events::{Event, PriorityEventQueue};
use crate::feedback::{Feedback, FeedbackSignal};
use crate::{Error, Result};

/// Listener state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Spotting the wake phrase
    Idle,
    /// Capturing the utterance after the wake phrase
    Recording,
    /// Waiting for the transcript
    Transcribing,
}

/// Why the loop stopped
#[derive(Debug)]
pub enum ListenerExit {
    /// Shutdown was requested
    Shutdown,
    /// The microphone failed; wake word detection is off for this process
    DeviceFailed(Error),
}

/// The audio capture loop
pub struct AudioCaptureLoop<M: Microphone> {
    mic: M,
    spotter: WakeWordSpotter,
    recorder: UtteranceRecorder,
    queue: Arc<PriorityEventQueue>,
    feedback: Arc<dyn Feedback>,
    shutdown: Arc<AtomicBool>,
    state: ListenerState,
}

impl<M: Microphone> AudioCaptureLoop<M> {
    /// Assemble a loop; nothing runs until [`AudioCaptureLoop::run`]
    #[must_use]
    pub fn new(
        mic: M,
        spotter: WakeWordSpotter,
        recorder: UtteranceRecorder,
        queue: Arc<PriorityEventQueue>,
        feedback: Arc<dyn Feedback>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            mic,
            spotter,
            recorder,
            queue,
            feedback,
            shutdown,
            state: ListenerState::Idle,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ListenerState {
        self.state
    }

    /// Microphone samples needed to produce one spotter frame
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn mic_frame_len(&self) -> usize {
        let spotter_len = self.spotter.frame_length() as u64;
        (spotter_len * u64::from(self.mic.sample_rate()) / u64::from(self.spotter.sample_rate()))
            as usize
    }

    /// Run until shutdown or device failure
    pub fn run(mut self) -> ListenerExit {
        let mut frame = vec![0i16; self.mic_frame_len()];

        tracing::info!(
            mic_rate = self.mic.sample_rate(),
            spotter_rate = self.spotter.sample_rate(),
            spotter_len = self.spotter.frame_length(),
            recorder_rate = self.recorder.sample_rate(),
            "listening for wake word"
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.step(&mut frame) {
                tracing::error!(error = %e, "microphone failed, wake word detection disabled");
                return ListenerExit::DeviceFailed(e);
            }
        }

        tracing::info!("listener stopped");
        ListenerExit::Shutdown
    }

    /// Advance one transition, reading one microphone frame unless transcribing
    ///
    /// `frame` must hold [`AudioCaptureLoop::mic_frame_len`] samples.
    ///
    /// # Errors
    ///
    /// Returns error only if the microphone read fails
    pub fn step(&mut self, frame: &mut [i16]) -> Result<ListenerState> {
        self.state = match self.state {
            ListenerState::Idle => self.listen(frame)?,
            ListenerState::Recording => self.record(frame)?,
            ListenerState::Transcribing => {
                self.complete_utterance();
                self.spotter.reset();
                ListenerState::Idle
            }
        };
        Ok(self.state)
    }

    fn listen(&mut self, frame: &mut [i16]) -> Result<ListenerState> {
        self.mic.read_frame(frame)?;

        let spotter_frame = dsp::resample_to_len(frame, self.spotter.frame_length());
        match self.spotter.process(&spotter_frame) {
            Ok(Some(index)) => {
                tracing::debug!(index, "wake phrase matched, recording");
                self.feedback.notify(FeedbackSignal::WakeDetected);
                self.recorder.begin();
                Ok(ListenerState::Recording)
            }
            Ok(None) => Ok(ListenerState::Idle),
            Err(e) => {
                tracing::warn!(error = %e, "wake word processing failed");
                Ok(ListenerState::Idle)
            }
        }
    }

    fn record(&mut self, frame: &mut [i16]) -> Result<ListenerState> {
        self.mic.read_frame(frame)?;

        let chunk = dsp::resample(frame, self.mic.sample_rate(), self.recorder.sample_rate());
        match self.recorder.push(&chunk) {
            RecordingStatus::Recording => Ok(ListenerState::Recording),
            RecordingStatus::Stopped(reason) => {
                tracing::debug!(?reason, utterance = ?self.recorder.utterance(), "recording stopped");
                Ok(ListenerState::Transcribing)
            }
        }
    }

    fn complete_utterance(&mut self) {
        if !self.recorder.has_minimum_audio() {
            tracing::debug!(utterance = ?self.recorder.utterance(), "utterance too short, ignoring");
            return;
        }

        self.feedback.notify(FeedbackSignal::Transcribing);

        let transcript = match self.recorder.finish() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                return;
            }
        };

        if transcript.is_empty() {
            tracing::debug!("empty transcript, ignoring");
            return;
        }

        tracing::info!(transcript = %transcript, "utterance captured");
        if !self.queue.offer(Event::wake_word(transcript)) {
            tracing::warn!(
                capacity = self.queue.capacity(),
                "event queue full, dropping wake word event"
            );
        }
    }
}

/// Handle to a listener running on its own thread
pub struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<ListenerExit>,
}

impl ListenerHandle {
    /// Ask the loop to stop after its current frame
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Whether the thread has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread to exit
    ///
    /// # Errors
    ///
    /// Returns error if the thread panicked
    pub fn join(self) -> Result<ListenerExit> {
        self.thread
            .join()
            .map_err(|_| Error::Audio("listener thread panicked".to_string()))
    }
}

/// Spawn the listener on a dedicated thread
///
/// `open_mic` runs on the new thread because audio streams are not `Send`.
/// If it fails the thread exits with [`ListenerExit::DeviceFailed`].
///
/// # Errors
///
/// Returns error if the thread cannot be spawned
pub fn spawn_listener<M, F>(
    open_mic: F,
    spotter: WakeWordSpotter,
    recorder: UtteranceRecorder,
    queue: Arc<PriorityEventQueue>,
    feedback: Arc<dyn Feedback>,
) -> Result<ListenerHandle>
where
    M: Microphone,
    F: FnOnce() -> Result<M> + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    let thread = std::thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || {
            let mic = match open_mic() {
                Ok(mic) => mic,
                Err(e) => {
                    tracing::error!(error = %e, "failed to open microphone, voice input disabled");
                    return ListenerExit::DeviceFailed(e);
                }
            };
            AudioCaptureLoop::new(mic, spotter, recorder, queue, feedback, flag).run()
        })?;

    Ok(ListenerHandle { shutdown, thread })
}
