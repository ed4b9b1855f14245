//! Conversation context shared between turns
//!
//! Readers take a [`ContextSnapshot`]; the lock is never held across an await.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};

use crate::mood::{MoodState, PadVector};
use crate::prompt::ChatMessage;

/// Point-in-time copy of the context used to build a prompt
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    /// Persona instructions
    pub persona: String,
    /// Recent history, oldest first
    pub history: Vec<ChatMessage>,
    /// Mood at snapshot time
    pub mood: PadVector,
    /// Local time at snapshot time
    pub now: DateTime<Local>,
}

/// A completed user/assistant exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: String,
    pub reply: String,
}

#[derive(Debug)]
struct ConversationContext {
    persona: String,
    history: VecDeque<ChatMessage>,
    max_messages: usize,
}

/// Message history plus mood handle, cheap to clone
#[derive(Debug, Clone)]
pub struct SharedContext {
    inner: Arc<Mutex<ConversationContext>>,
    mood: Arc<MoodState>,
}

impl SharedContext {
    /// Create an empty context keeping at most `max_messages` history entries
    #[must_use]
    pub fn new(persona: impl Into<String>, max_messages: usize, mood: Arc<MoodState>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConversationContext {
                persona: persona.into(),
                history: VecDeque::new(),
                max_messages,
            })),
            mood,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConversationContext> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy the current state
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let ctx = self.lock();
        ContextSnapshot {
            persona: ctx.persona.clone(),
            history: ctx.history.iter().cloned().collect(),
            mood: self.mood.read(),
            now: Local::now(),
        }
    }

    /// Append a finished exchange, evicting the oldest messages past the limit
    ///
    /// An empty reply records only `input`.
    pub fn record_turn(&self, input: ChatMessage, reply: &str) {
        let mut ctx = self.lock();
        ctx.history.push_back(input);
        if !reply.trim().is_empty() {
            ctx.history.push_back(ChatMessage::assistant(reply));
        }
        while ctx.history.len() > ctx.max_messages {
            ctx.history.pop_front();
        }
    }

    /// Number of messages held
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().history.len()
    }

    /// Whether no messages are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared mood handle
    #[must_use]
    pub const fn mood(&self) -> &Arc<MoodState> {
        &self.mood
    }
}
