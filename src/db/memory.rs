//! Memory repository for long-term memory storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// Column list for all memory SELECT queries
const MEMORY_COLUMNS: &str = "id, category, content, tags, created_at";

/// Map a database row to a `MemoryRow`
fn row_to_memory_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    Ok(MemoryRow {
        id: row.get(0)?,
        category: row.get(1)?,
        content: row.get(2)?,
        tags: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Memory categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    /// User preferences (how they like things done)
    Preference,
    /// Facts about the user or their environment
    Fact,
    /// Corrections from user feedback
    Correction,
    /// General learned information
    General,
}

impl MemoryCategory {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Fact => "fact",
            Self::Correction => "correction",
            Self::General => "general",
        }
    }

    /// Parse a stored or model-provided category, falling back to `General`
    #[must_use]
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "preference" => Self::Preference,
            "fact" => Self::Fact,
            "correction" => Self::Correction,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A memory item stored in the database
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    pub id: String,
    pub category: MemoryCategory,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Create a new memory item
    #[must_use]
    pub fn new(category: MemoryCategory, content: impl Into<String>) -> Self {
        Self {
            id: format!("mem_{}", Uuid::new_v4()),
            category,
            content: content.into(),
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Add a tag to this memory
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Key used to detect the same fact phrased with different case or spacing
    fn content_key(&self) -> String {
        self.content.trim().to_lowercase()
    }
}

/// Memory repository for database operations
#[derive(Debug, Clone)]
pub struct MemoryRepo {
    pool: DbPool,
}

impl MemoryRepo {
    /// Create a new memory repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Add a memory unless the same content is already stored
    ///
    /// Returns whether a row was inserted.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add(&self, memory: &Memory) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let tags_json = serde_json::to_string(&memory.tags)?;

        let inserted = conn.execute(
            r"INSERT OR IGNORE INTO memories (id, category, content, tags, created_at, content_key)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                memory.id,
                memory.category.as_str(),
                memory.content,
                tags_json,
                memory.created_at.to_rfc3339(),
                memory.content_key(),
            ],
        )?;

        Ok(inserted > 0)
    }

    /// Get a memory by ID
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
            [id],
            row_to_memory_row,
        );

        match result {
            Ok(row) => Ok(Some(row.into_memory())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recently formed memories, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, max_items: usize) -> Result<Vec<Memory>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;

        #[allow(clippy::cast_possible_wrap)]
        let limit = max_items as i64;
        let rows = stmt.query_map([limit], row_to_memory_row)?;

        let memories: Vec<Memory> = rows.flatten().map(MemoryRow::into_memory).collect();
        Ok(memories)
    }

    /// Number of stored memories
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<usize> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Delete a memory
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let deleted = conn.execute("DELETE FROM memories WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    /// Format memories for prompt injection
    #[must_use]
    pub fn format_for_prompt(memories: &[Memory]) -> String {
        use std::fmt::Write;

        if memories.is_empty() {
            return String::new();
        }

        let mut output = String::from("Remembered facts about the user:\n");

        for mem in memories {
            let _ = writeln!(output, "- [{}] {}", mem.category, mem.content);
        }

        output
    }
}

/// Internal struct for database row mapping
struct MemoryRow {
    id: String,
    category: String,
    content: String,
    tags: String,
    created_at: String,
}

impl MemoryRow {
    fn into_memory(self) -> Memory {
        Memory {
            id: self.id,
            category: MemoryCategory::parse_lossy(&self.category),
            content: self.content,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_memory_crud() {
        let repo = MemoryRepo::new(db::init_memory().unwrap());

        let memory = Memory::new(MemoryCategory::Preference, "Prefers metric units").with_tag("units");
        assert!(repo.add(&memory).unwrap());

        let fetched = repo.get(&memory.id).unwrap().unwrap();
        assert_eq!(fetched.content, "Prefers metric units");
        assert_eq!(fetched.category, MemoryCategory::Preference);
        assert_eq!(fetched.tags, ["units"]);

        assert!(repo.delete(&memory.id).unwrap());
        assert!(repo.get(&memory.id).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_content_ignored() {
        let repo = MemoryRepo::new(db::init_memory().unwrap());

        assert!(repo.add(&Memory::new(MemoryCategory::Fact, "Lives in Lisbon")).unwrap());
        assert!(!repo.add(&Memory::new(MemoryCategory::Fact, "  lives in lisbon ")).unwrap());
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_recent_newest_first() {
        let repo = MemoryRepo::new(db::init_memory().unwrap());

        for content in ["first", "second", "third"] {
            repo.add(&Memory::new(MemoryCategory::General, content)).unwrap();
        }

        let recent = repo.recent(2).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["third", "second"]);
    }

    #[test]
    fn test_category_parse_lossy() {
        assert_eq!(MemoryCategory::parse_lossy("Preference"), MemoryCategory::Preference);
        assert_eq!(MemoryCategory::parse_lossy("opinion"), MemoryCategory::General);
    }

    #[test]
    fn test_format_for_prompt() {
        let memories = vec![
            Memory::new(MemoryCategory::Preference, "Uses vim"),
            Memory::new(MemoryCategory::Fact, "Works at Acme"),
        ];

        let formatted = MemoryRepo::format_for_prompt(&memories);
        assert!(formatted.contains("[preference] Uses vim"));
        assert!(formatted.contains("[fact] Works at Acme"));
        assert!(MemoryRepo::format_for_prompt(&[]).is_empty());
    }
}
