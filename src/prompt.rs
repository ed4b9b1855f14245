//! Prompt assembly for a single turn

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::context::ContextSnapshot;
use crate::db::{Memory, MemoryRepo};

/// Chat message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A complete request for the text generator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    /// System instructions
    pub system: String,
    /// History followed by the current user message
    pub messages: Vec<ChatMessage>,
}

impl Prompt {
    /// A one-shot prompt with no history
    #[must_use]
    pub fn single(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: vec![ChatMessage::user(user)],
        }
    }
}

const SPOKEN_STYLE: &str = "Your replies are spoken aloud. Answer in a few short, plain \
sentences. Do not use markdown, lists, code blocks or emoji.";

/// Build the prompt for one turn
///
/// The system message carries the persona, current mood, local time and
/// remembered facts; the messages carry the snapshot's history followed by
/// `input`.
#[must_use]
pub fn build_prompt(snapshot: &ContextSnapshot, memories: &[Memory], input: ChatMessage) -> Prompt {
    let mut system = String::new();

    if !snapshot.persona.is_empty() {
        system.push_str(snapshot.persona.trim());
        system.push_str("\n\n");
    }
    system.push_str(SPOKEN_STYLE);
    system.push_str("\n\n");

    let mood = snapshot.mood;
    let _ = writeln!(
        system,
        "Current mood: {} (pleasure {:.2}, arousal {:.2}, dominance {:.2}). Let it color your tone, never mention it.",
        mood.label(),
        mood.pleasure,
        mood.arousal,
        mood.dominance
    );
    let _ = writeln!(
        system,
        "Local time: {}",
        snapshot.now.format("%A %-d %B %Y, %H:%M")
    );

    let remembered = MemoryRepo::format_for_prompt(memories);
    if !remembered.is_empty() {
        system.push('\n');
        system.push_str(&remembered);
    }

    let mut messages = snapshot.history.clone();
    messages.push(input);

    Prompt {
        system: system.trim_end().to_string(),
        messages,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use super::*;
    use crate::db::MemoryCategory;
    use crate::mood::PadVector;

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot {
            persona: "You are Vesper, a helpful home assistant.".to_string(),
            history: vec![
                ChatMessage::user("hello"),
                ChatMessage::assistant("Hi there."),
            ],
            mood: PadVector::new(0.6, 0.6, 0.0),
            now: Local.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_history_then_user() {
        let prompt = build_prompt(&snapshot(), &[], ChatMessage::user("what time is it"));
        assert_eq!(prompt.messages.len(), 3);
        assert_eq!(prompt.messages[2], ChatMessage::user("what time is it"));
        assert_eq!(prompt.messages[0].role, Role::User);
    }

    #[test]
    fn test_system_sections() {
        let memories = [Memory::new(MemoryCategory::Fact, "Has a cat named Miso")];
        let prompt = build_prompt(&snapshot(), &memories, ChatMessage::user("hi"));

        assert!(prompt.system.starts_with("You are Vesper"));
        assert!(prompt.system.contains("Current mood: excited"));
        assert!(prompt.system.contains("Saturday 14 March 2026, 09:30"));
        assert!(prompt.system.contains("[fact] Has a cat named Miso"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
