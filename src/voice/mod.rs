//! Voice processing module
//!
//! Microphone capture, wake word spotting, utterance recording and
//! transcription on the audio thread; synthesis and playback for replies.

mod capture;
pub mod dsp;
mod listener;
mod playback;
mod recorder;
mod stt;
mod tts;
mod wake_word;

pub use capture::{CpalMicrophone, Microphone, samples_to_wav};
pub use listener::{AudioCaptureLoop, ListenerExit, ListenerHandle, ListenerState, spawn_listener};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3, play_cancellable};
pub use recorder::{RecordingLimits, RecordingStatus, StopReason, Utterance, UtteranceRecorder};
pub use stt::{CloudTranscriber, SttProvider, Transcriber};
pub use tts::{CloudSynthesizer, CommandSynthesizer, SpeechSynthesizer, TtsProvider, VoiceParams};
pub use wake_word::{DetectorState, KeywordModel, PhraseKeywordModel, WakeWordSpotter};
