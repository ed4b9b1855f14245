//! The conversational event handler
//!
//! Runs turns: prompt from a context snapshot, streamed reply into the
//! segmenter and speech sink, then history update and background updaters.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use regex::Regex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agenda::{ActionPlanner, CalendarEntry, CalendarWatcher, DesireBoard};
use crate::background::BackgroundUpdaters;
use crate::context::{Exchange, SharedContext};
use crate::db::MemoryRepo;
use crate::dispatcher::EventHandler;
use crate::events::{Event, EventKind};
use crate::llm::TextGenerator;
use crate::prompt::{ChatMessage, build_prompt};
use crate::speech::{OrderedSpeechSink, ResponseSegmenter};
use crate::voice::VoiceParams;
use crate::{Error, Result};

static REMINDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bremind me (?:in|after) (\d+|an?|one) (second|minute|hour)s? (?:to |that |about )?(.+)",
    )
    .unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Parse "remind me in N minutes to ..." into what and when
#[must_use]
pub fn parse_reminder(text: &str, now: DateTime<Utc>) -> Option<(String, DateTime<Utc>)> {
    let caps = REMINDER.captures(text)?;

    let amount: i64 = match caps[1].to_ascii_lowercase().as_str() {
        "a" | "an" | "one" => 1,
        n => n.parse().ok()?,
    };
    let delay = match caps[2].to_ascii_lowercase().as_str() {
        "second" => chrono::Duration::try_seconds(amount)?,
        "minute" => chrono::Duration::try_minutes(amount)?,
        _ => chrono::Duration::try_hours(amount)?,
    };

    let what = caps[3].trim().trim_end_matches(['.', '!', '?']).trim();
    if what.is_empty() {
        return None;
    }
    Some((what.to_string(), now.checked_add_signed(delay)?))
}

/// What starts a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    /// Something the user said
    User(String),
    /// An instruction from the agenda; kept in history as a system note
    Note(String),
}

impl TurnInput {
    fn message(&self) -> ChatMessage {
        match self {
            Self::User(text) => ChatMessage::user(text.as_str()),
            Self::Note(text) => ChatMessage::system(text.as_str()),
        }
    }
}

/// Handles every event kind by talking to the user
pub struct Assistant {
    generator: Arc<dyn TextGenerator>,
    sink: OrderedSpeechSink,
    voice: VoiceParams,
    context: SharedContext,
    background: BackgroundUpdaters,
    memories: Option<(MemoryRepo, usize)>,
    desires: Arc<DesireBoard>,
    planner: Arc<ActionPlanner>,
    calendar: Option<Arc<CalendarWatcher>>,
}

impl Assistant {
    /// Create an assistant with an empty agenda and no memory store
    #[must_use]
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        sink: OrderedSpeechSink,
        voice: VoiceParams,
        context: SharedContext,
        background: BackgroundUpdaters,
    ) -> Self {
        Self {
            generator,
            sink,
            voice,
            context,
            background,
            memories: None,
            desires: Arc::new(DesireBoard::new()),
            planner: Arc::new(ActionPlanner::new()),
            calendar: None,
        }
    }

    /// Include up to `max_items` recent memories in every prompt
    #[must_use]
    pub fn with_memories(mut self, repo: MemoryRepo, max_items: usize) -> Self {
        self.memories = Some((repo, max_items));
        self
    }

    /// Share agenda state with the timers that produce events
    #[must_use]
    pub fn with_agenda(
        mut self,
        desires: Arc<DesireBoard>,
        planner: Arc<ActionPlanner>,
        calendar: Option<Arc<CalendarWatcher>>,
    ) -> Self {
        self.desires = desires;
        self.planner = planner;
        self.calendar = calendar;
        self
    }

    /// Open the reply stream and spawn the rest of the turn
    ///
    /// The handle resolves once the reply has been queued for speech and
    /// recorded in the context. A user turn whose stream fails still keeps
    /// the partial reply. A note turn whose stream fails records nothing and
    /// resolves to the stream error.
    ///
    /// # Errors
    ///
    /// Returns error if the reply stream cannot be opened
    pub async fn start_turn(&self, input: TurnInput) -> Result<JoinHandle<Result<String>>> {
        let snapshot = self.context.snapshot();
        let memories = match &self.memories {
            Some((repo, max_items)) => repo.recent(*max_items).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load memories");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let prompt = build_prompt(&snapshot, &memories, input.message());
        let stream = self.generator.generate_stream(&prompt).await?;

        let segmenter = ResponseSegmenter::new(self.sink.clone(), self.voice.clone());
        let context = self.context.clone();
        let background = self.background.clone();

        Ok(tokio::spawn(async move {
            let reply = segmenter.run(stream).await;

            let reply = match (input, reply.error) {
                (TurnInput::Note(note), Some(e)) => {
                    tracing::warn!(note = %note, error = %e, "note turn failed");
                    return Err(e);
                }
                (TurnInput::Note(note), None) => {
                    context.record_turn(ChatMessage::system(note), &reply.text);
                    reply.text
                }
                (TurnInput::User(user), error) => {
                    if error.is_some() {
                        tracing::info!(user = %user, "keeping partial reply");
                    }
                    context.record_turn(ChatMessage::user(user.as_str()), &reply.text);
                    if !reply.text.trim().is_empty() {
                        background.turn_completed(Exchange {
                            user,
                            reply: reply.text.clone(),
                        });
                    }
                    reply.text
                }
            };

            tracing::info!(reply = %reply, "turn complete");
            Ok(reply)
        }))
    }

    /// Run a whole turn and return the reply text
    ///
    /// # Errors
    ///
    /// Returns error if the reply stream cannot be opened, the turn task
    /// dies, or a note turn's stream fails
    pub async fn run_turn(&self, input: TurnInput) -> Result<String> {
        self.start_turn(input)
            .await?
            .await
            .map_err(|e| Error::Handler(format!("turn task failed: {e}")))?
    }

    /// Shared desire board
    #[must_use]
    pub const fn desires(&self) -> &Arc<DesireBoard> {
        &self.desires
    }

    /// Shared action planner
    #[must_use]
    pub const fn planner(&self) -> &Arc<ActionPlanner> {
        &self.planner
    }
}

fn describe_entry(entry: &CalendarEntry) -> String {
    let start = entry.start.with_timezone(&Local).format("%H:%M");
    let mut text = format!(
        "[calendar] \"{}\" starts at {start}.",
        entry.title.trim()
    );
    if let Some(location) = entry.location.as_deref().filter(|l| !l.trim().is_empty()) {
        text.push_str(&format!(" Location: {}.", location.trim()));
    }
    text.push_str(" Give the user a short heads-up.");
    text
}

#[async_trait]
impl EventHandler for Assistant {
    async fn on_wake_word(&self, transcript: &str) -> Result<()> {
        if let Some((what, due)) = parse_reminder(transcript, Utc::now()) {
            self.planner.schedule(what, due);
        }

        // The turn runs on its own; the dispatcher moves on
        drop(self.start_turn(TurnInput::User(transcript.to_string())).await?);
        Ok(())
    }

    async fn on_calendar_alert(&self, entry: &CalendarEntry) -> Result<()> {
        self.run_turn(TurnInput::Note(describe_entry(entry)))
            .await
            .map(drop)
    }

    async fn on_initiative(&self, desire_id: Uuid) -> Result<()> {
        let desire = self
            .desires
            .get(desire_id)
            .ok_or_else(|| Error::Handler(format!("unknown desire {desire_id}")))?;

        self.run_turn(TurnInput::Note(format!(
            "[initiative] You would like to {}. Bring it up with the user naturally, in one or two sentences.",
            desire.description.trim()
        )))
        .await?;

        self.desires.fulfil(desire_id);
        Ok(())
    }

    async fn on_planned_action(&self, action_id: Uuid) -> Result<()> {
        let action = self
            .planner
            .get(action_id)
            .ok_or_else(|| Error::Handler(format!("unknown planned action {action_id}")))?;

        self.run_turn(TurnInput::Note(format!(
            "[reminder] It is time for: {}. Remind the user briefly.",
            action.description.trim()
        )))
        .await?;

        self.planner.complete(action_id);
        Ok(())
    }

    fn revert(&self, event: &Event) {
        match &event.kind {
            EventKind::WakeWord { .. } => {}
            EventKind::CalendarAlert { entry } => {
                if let Some(calendar) = &self.calendar {
                    calendar.forget(&entry.id);
                }
            }
            EventKind::Initiative { desire_id } => {
                self.desires.revert(*desire_id);
            }
            EventKind::PlannedAction { action_id } => {
                self.planner.revert(*action_id);
            }
        }
    }
}
