//! Ordered speech output
//!
//! A single worker speaks submitted sentences strictly in submission order,
//! one at a time, each bounded by a deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::voice::{SpeechSynthesizer, VoiceParams};
use crate::{Error, Result};

/// One queued sentence
#[derive(Debug)]
struct SpeechItem {
    text: String,
    voice: VoiceParams,
}

/// Handle for submitting speech; clones share the same worker
///
/// The worker exits once every handle is dropped and the backlog is spoken.
#[derive(Debug, Clone)]
pub struct OrderedSpeechSink {
    tx: mpsc::UnboundedSender<SpeechItem>,
}

impl OrderedSpeechSink {
    /// Start the worker on the current runtime
    ///
    /// `timeout` bounds each synthesis call. Expiry abandons that sentence
    /// and moves on to the next.
    #[must_use]
    pub fn spawn(synth: Arc<dyn SpeechSynthesizer>, timeout: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, synth, timeout));
        (Self { tx }, worker)
    }

    /// Queue `text` for speaking without waiting for it
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkClosed`] if the worker has stopped
    pub fn submit(&self, text: impl Into<String>, voice: VoiceParams) -> Result<()> {
        self.tx
            .send(SpeechItem {
                text: text.into(),
                voice,
            })
            .map_err(|_| Error::SinkClosed)
    }

    /// Whether the worker has stopped accepting speech
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<SpeechItem>,
    synth: Arc<dyn SpeechSynthesizer>,
    timeout: Duration,
) {
    let mut output_disabled = false;

    while let Some(item) = rx.recv().await {
        if output_disabled {
            tracing::trace!(text = %item.text, "speech output disabled, dropping sentence");
            continue;
        }

        match tokio::time::timeout(timeout, synth.speak(&item.text, &item.voice)).await {
            Ok(Ok(())) => tracing::trace!(text = %item.text, "spoken"),
            Ok(Err(e)) if e.is_device_failure() => {
                tracing::error!(error = %e, "speech output device failed, speech disabled");
                output_disabled = true;
            }
            Ok(Err(e)) => tracing::warn!(error = %e, text = %item.text, "speech synthesis failed"),
            Err(_) => {
                let e = Error::Timeout(timeout);
                tracing::warn!(error = %e, text = %item.text, "speech synthesis abandoned");
            }
        }
    }

    tracing::debug!("speech sink stopped");
}
