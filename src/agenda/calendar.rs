//! Calendar entries and upcoming-entry alerts

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// One calendar entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    /// Stable identifier
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Read access to a calendar
pub trait CalendarSource: Send + Sync {
    /// Entries starting in `[from, until]`, soonest first
    ///
    /// # Errors
    ///
    /// Returns error if the calendar cannot be read
    fn upcoming(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<CalendarEntry>>;
}

/// Calendar stored as a JSON array of entries
///
/// Reread on every query so edits apply without a restart. A missing file is
/// an empty calendar.
#[derive(Debug, Clone)]
pub struct JsonCalendar {
    path: PathBuf,
}

impl JsonCalendar {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CalendarSource for JsonCalendar {
    fn upcoming(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<CalendarEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<CalendarEntry> = serde_json::from_str(&content)?;
        let mut upcoming: Vec<CalendarEntry> = entries
            .into_iter()
            .filter(|e| e.start >= from && e.start <= until)
            .collect();
        upcoming.sort_by_key(|e| e.start);
        Ok(upcoming)
    }
}

/// Produces each entry's alert once, `lead` ahead of its start
pub struct CalendarWatcher {
    source: Box<dyn CalendarSource>,
    lead: Duration,
    alerted: Mutex<HashSet<String>>,
}

impl CalendarWatcher {
    #[must_use]
    pub fn new(source: Box<dyn CalendarSource>, lead: Duration) -> Self {
        Self {
            source,
            lead,
            alerted: Mutex::new(HashSet::new()),
        }
    }

    /// Entries entering the lead window that have not been alerted yet
    ///
    /// Returned entries count as alerted.
    ///
    /// # Errors
    ///
    /// Returns error if the calendar cannot be read
    pub fn due_alerts(&self, now: DateTime<Utc>) -> Result<Vec<CalendarEntry>> {
        let entries = self.source.upcoming(now, now + self.lead)?;
        let mut alerted = self.alerted.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .into_iter()
            .filter(|e| alerted.insert(e.id.clone()))
            .collect())
    }

    /// Re-arm an entry so the next poll alerts it again
    pub fn forget(&self, id: &str) -> bool {
        self.alerted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_calendar(entries: &[CalendarEntry]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(entries).unwrap().as_bytes())
            .unwrap();
        file
    }

    fn entry(id: &str, start: DateTime<Utc>) -> CalendarEntry {
        CalendarEntry {
            id: id.to_string(),
            title: format!("meeting {id}"),
            start,
            location: None,
            notes: None,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let calendar = JsonCalendar::new(PathBuf::from("/nonexistent/vesper/calendar.json"));
        let now = Utc::now();
        assert!(calendar.upcoming(now, now + Duration::hours(1)).unwrap().is_empty());
    }

    #[test]
    fn test_upcoming_window() {
        let now = Utc::now();
        let file = write_calendar(&[
            entry("past", now - Duration::minutes(5)),
            entry("later", now + Duration::minutes(30)),
            entry("soon", now + Duration::minutes(10)),
            entry("tomorrow", now + Duration::days(1)),
        ]);

        let calendar = JsonCalendar::new(file.path().to_path_buf());
        let ids: Vec<String> = calendar
            .upcoming(now, now + Duration::hours(1))
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, ["soon", "later"]);
    }

    #[test]
    fn test_watcher_alerts_once_until_forgotten() {
        let now = Utc::now();
        let file = write_calendar(&[entry("standup", now + Duration::minutes(5))]);
        let watcher = CalendarWatcher::new(
            Box::new(JsonCalendar::new(file.path().to_path_buf())),
            Duration::minutes(15),
        );

        assert_eq!(watcher.due_alerts(now).unwrap().len(), 1);
        assert!(watcher.due_alerts(now).unwrap().is_empty());

        assert!(watcher.forget("standup"));
        assert_eq!(watcher.due_alerts(now).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_file_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        let calendar = JsonCalendar::new(file.path().to_path_buf());
        let now = Utc::now();
        assert!(calendar.upcoming(now, now + Duration::hours(1)).is_err());
    }
}
