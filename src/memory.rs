//! Memory formation from finished exchanges
//!
//! Asks the text generator for durable facts about the user and stores them
//! with [`MemoryRepo`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::Exchange;
use crate::db::{Memory, MemoryCategory, MemoryRepo};
use crate::llm::{TextGenerator, collect_text};
use crate::prompt::Prompt;
use crate::Result;

const EXTRACTION_PROMPT: &str = r#"You extract facts, preferences, and corrections from conversations.

Output only JSON with this structure:
{
  "facts": [
    {"content": "...", "category": "preference|fact|correction", "tags": ["tag1"]}
  ]
}

Categories:
- preference: How the user likes things done
- fact: Factual information about the user (name, location, job, relationships)
- correction: When the user corrects a previous assumption or error

Only extract meaningful, persistent information. Ignore temporary states,
one-time requests, greetings and pleasantries. Output {"facts": []} when
nothing qualifies. Each fact is a single, clear statement."#;

/// Extracted fact from a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    /// The fact content
    pub content: String,
    /// Category of the fact
    #[serde(default)]
    pub category: String,
    /// Relevance tags
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Response from fact extraction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResponse {
    /// List of extracted facts
    #[serde(default)]
    pub facts: Vec<ExtractedFact>,
}

impl ExtractionResponse {
    /// Parse model output, tolerating text or code fences around the JSON
    ///
    /// Unparseable output yields no facts.
    #[must_use]
    pub fn parse_lenient(output: &str) -> Self {
        let json = match (output.find('{'), output.rfind('}')) {
            (Some(start), Some(end)) if start < end => &output[start..=end],
            _ => return Self::default(),
        };

        serde_json::from_str(json).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "fact extraction output not valid JSON");
            Self::default()
        })
    }
}

/// Turns exchanges into stored memories
pub struct MemoryFormer {
    generator: Arc<dyn TextGenerator>,
    memory_repo: MemoryRepo,
}

impl MemoryFormer {
    /// Create a memory former
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, memory_repo: MemoryRepo) -> Self {
        Self {
            generator,
            memory_repo,
        }
    }

    /// Extract facts from `exchange` and store the new ones
    ///
    /// Returns the memories that were actually inserted.
    ///
    /// # Errors
    ///
    /// Returns error if extraction or storage fails
    pub async fn form(&self, exchange: &Exchange) -> Result<Vec<Memory>> {
        let conversation = format!("User: {}\nAssistant: {}", exchange.user, exchange.reply);
        let prompt = Prompt::single(
            EXTRACTION_PROMPT,
            format!("Extract facts from this conversation:\n\n{conversation}"),
        );

        let output = collect_text(self.generator.generate_stream(&prompt).await?).await?;
        let extracted = ExtractionResponse::parse_lenient(&output);

        let mut memories = Vec::new();
        for fact in extracted.facts {
            if fact.content.trim().is_empty() {
                continue;
            }

            let mut memory = Memory::new(MemoryCategory::parse_lossy(&fact.category), fact.content);
            for tag in fact.tags {
                memory = memory.with_tag(tag);
            }

            if self.memory_repo.add(&memory)? {
                memories.push(memory);
            }
        }

        tracing::info!(count = memories.len(), "formed memories from exchange");
        Ok(memories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_response_parse() {
        let json = r#"{
            "facts": [
                {"content": "User prefers dark mode", "category": "preference", "tags": ["ui"]},
                {"content": "User works at Acme Corp", "category": "fact", "tags": ["work"]}
            ]
        }"#;

        let response = ExtractionResponse::parse_lenient(json);
        assert_eq!(response.facts.len(), 2);
        assert_eq!(response.facts[0].category, "preference");
        assert_eq!(response.facts[1].tags, vec!["work"]);
    }

    #[test]
    fn test_parse_with_fences() {
        let output = "```json\n{\"facts\": [{\"content\": \"Owns a bike\"}]}\n```";
        let response = ExtractionResponse::parse_lenient(output);
        assert_eq!(response.facts.len(), 1);
        assert!(response.facts[0].tags.is_empty());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(ExtractionResponse::parse_lenient("no facts here").facts.is_empty());
        assert!(ExtractionResponse::parse_lenient("} {").facts.is_empty());
        assert!(ExtractionResponse::parse_lenient("{not json}").facts.is_empty());
    }
}
