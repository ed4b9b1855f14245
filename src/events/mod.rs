//! Pipeline events
//!
//! Every producer (audio thread, calendar, initiative and planned-action
//! timers) talks to the dispatcher through [`Event`]s offered to the
//! [`PriorityEventQueue`].

mod queue;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::agenda::CalendarEntry;

pub use queue::PriorityEventQueue;

/// Delivery priority; lower ordinal is delivered first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High = 0,
    Medium = 1,
    Low = 2,
}

impl Priority {
    /// All priorities, highest first
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    /// Lane index, highest priority first
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Which producer created an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Microphone,
    Calendar,
    Initiative,
    Planner,
}

/// Event kind and its payload
///
/// Closed set: adding a variant forces every dispatcher match to be updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A transcribed utterance following the wake phrase
    WakeWord { transcript: String },
    /// An upcoming calendar entry
    CalendarAlert { entry: CalendarEntry },
    /// The assistant wants to act on one of its desires
    Initiative { desire_id: Uuid },
    /// A previously planned action is due
    PlannedAction { action_id: Uuid },
}

impl EventKind {
    /// Fixed priority of this kind
    #[must_use]
    pub const fn priority(&self) -> Priority {
        match self {
            Self::WakeWord { .. } | Self::CalendarAlert { .. } => Priority::High,
            Self::PlannedAction { .. } => Priority::Medium,
            Self::Initiative { .. } => Priority::Low,
        }
    }

    /// Short label for logs and feedback
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::WakeWord { .. } => "wake_word",
            Self::CalendarAlert { .. } => "calendar_alert",
            Self::Initiative { .. } => "initiative",
            Self::PlannedAction { .. } => "planned_action",
        }
    }
}

/// An immutable pipeline event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Unique event ID
    pub id: Uuid,
    /// Kind and payload
    #[serde(flatten)]
    pub kind: EventKind,
    /// Delivery priority, derived from the kind
    pub priority: Priority,
    /// Producer
    pub source: EventSource,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped now
    #[must_use]
    pub fn new(kind: EventKind, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: kind.priority(),
            kind,
            source,
            timestamp: Utc::now(),
        }
    }

    /// Wake word utterance from the microphone
    #[must_use]
    pub fn wake_word(transcript: impl Into<String>) -> Self {
        Self::new(
            EventKind::WakeWord {
                transcript: transcript.into(),
            },
            EventSource::Microphone,
        )
    }
}
