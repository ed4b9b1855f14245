//! User-facing feedback signals (chimes, LEDs, UI indicators)
//!
//! Fire-and-forget: producers never wait for, or learn about, delivery.

use tokio::sync::broadcast;

/// A feedback signal emitted by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackSignal {
    /// The wake phrase was heard; recording has started
    WakeDetected,
    /// Recording ended and the utterance is being transcribed
    Transcribing,
    /// A scheduled or autonomous task started
    TaskStarted {
        /// Event kind label
        kind: &'static str,
    },
    /// A scheduled or autonomous task finished (successfully or not)
    TaskEnded {
        /// Event kind label
        kind: &'static str,
        /// Whether the handler succeeded
        ok: bool,
    },
}

/// Feedback sink
pub trait Feedback: Send + Sync {
    /// Emit a signal
    fn notify(&self, signal: FeedbackSignal);
}

/// Logs feedback signals
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFeedback;

impl Feedback for TracingFeedback {
    fn notify(&self, signal: FeedbackSignal) {
        tracing::debug!(?signal, "feedback");
    }
}

/// Fans feedback out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastFeedback {
    tx: broadcast::Sender<FeedbackSignal>,
}

impl BroadcastFeedback {
    /// Create a broadcaster retaining up to `capacity` unread signals per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future signals
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FeedbackSignal> {
        self.tx.subscribe()
    }
}

impl Feedback for BroadcastFeedback {
    fn notify(&self, signal: FeedbackSignal) {
        tracing::trace!(?signal, "feedback");
        // No subscribers is fine
        let _ = self.tx.send(signal);
    }
}
