//! Single consumer of the event queue
//!
//! Wake word turns are started and left running; scheduled and autonomous
//! events are awaited between start/end feedback and rolled back on failure.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::agenda::CalendarEntry;
use crate::events::{Event, EventKind, PriorityEventQueue};
use crate::feedback::{Feedback, FeedbackSignal};
use crate::Result;

/// Handlers for each event kind
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Open a reply for `transcript` and hand the turn off to a task
    ///
    /// Must return once the turn is started, not when it finishes.
    ///
    /// # Errors
    ///
    /// Returns error if the turn could not be started
    async fn on_wake_word(&self, transcript: &str) -> Result<()>;

    /// Announce an upcoming calendar entry
    ///
    /// # Errors
    ///
    /// Returns error if the announcement fails
    async fn on_calendar_alert(&self, entry: &CalendarEntry) -> Result<()>;

    /// Act on an activated desire
    ///
    /// # Errors
    ///
    /// Returns error if the initiative fails
    async fn on_initiative(&self, desire_id: Uuid) -> Result<()>;

    /// Carry out a due planned action
    ///
    /// # Errors
    ///
    /// Returns error if the action fails
    async fn on_planned_action(&self, action_id: Uuid) -> Result<()>;

    /// Restore whatever produced `event` after its handler failed
    fn revert(&self, event: &Event);
}

/// Routes queued events to an [`EventHandler`]
pub struct Dispatcher {
    queue: Arc<PriorityEventQueue>,
    handler: Arc<dyn EventHandler>,
    feedback: Arc<dyn Feedback>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        queue: Arc<PriorityEventQueue>,
        handler: Arc<dyn EventHandler>,
        feedback: Arc<dyn Feedback>,
    ) -> Self {
        Self {
            queue,
            handler,
            feedback,
        }
    }

    /// Take and dispatch events until `shutdown` turns true or its sender drops
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(capacity = self.queue.capacity(), "dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                event = self.queue.take() => self.dispatch(event).await,
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!(pending = self.queue.len(), "dispatcher stopped");
    }

    /// Handle one event; never fails
    pub async fn dispatch(&self, event: Event) {
        let label = event.kind.label();
        tracing::debug!(id = %event.id, kind = label, priority = ?event.priority, source = ?event.source, "dispatching");

        let scheduled = match &event.kind {
            EventKind::WakeWord { transcript } => {
                if let Err(e) = self.handler.on_wake_word(transcript).await {
                    tracing::error!(error = %e, "failed to start turn");
                }
                return;
            }
            EventKind::CalendarAlert { entry } => {
                self.feedback.notify(FeedbackSignal::TaskStarted { kind: label });
                self.handler.on_calendar_alert(entry).await
            }
            EventKind::Initiative { desire_id } => {
                self.feedback.notify(FeedbackSignal::TaskStarted { kind: label });
                self.handler.on_initiative(*desire_id).await
            }
            EventKind::PlannedAction { action_id } => {
                self.feedback.notify(FeedbackSignal::TaskStarted { kind: label });
                self.handler.on_planned_action(*action_id).await
            }
        };

        self.feedback.notify(FeedbackSignal::TaskEnded {
            kind: label,
            ok: scheduled.is_ok(),
        });

        if let Err(e) = scheduled {
            tracing::error!(error = %e, id = %event.id, kind = label, "handler failed, reverting");
            self.handler.revert(&event);
        }
    }
}
