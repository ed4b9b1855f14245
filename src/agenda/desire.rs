//! Desires the assistant may act on unprompted

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a desire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesireStatus {
    /// Waiting for an initiative slot
    Pending,
    /// Handed to the dispatcher as an initiative event
    Active,
    /// Acted upon
    Fulfilled,
}

/// Something the assistant wants to bring up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Desire {
    pub id: Uuid,
    pub description: String,
    /// Strength in `[0, 1]`; the strongest pending desire goes first
    pub intensity: f32,
    pub status: DesireStatus,
}

/// All known desires
#[derive(Debug, Default)]
pub struct DesireBoard {
    desires: Mutex<Vec<Desire>>,
}

impl DesireBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn desires(&self) -> MutexGuard<'_, Vec<Desire>> {
        self.desires.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a pending desire
    pub fn add(&self, description: impl Into<String>, intensity: f32) -> Uuid {
        let id = Uuid::new_v4();
        self.desires().push(Desire {
            id,
            description: description.into(),
            intensity: if intensity.is_nan() { 0.0 } else { intensity.clamp(0.0, 1.0) },
            status: DesireStatus::Pending,
        });
        id
    }

    /// Mark the strongest pending desire active and return it
    ///
    /// Ties go to the earliest added.
    pub fn activate_strongest(&self) -> Option<Desire> {
        let mut desires = self.desires();
        let strongest = desires
            .iter_mut()
            .filter(|d| d.status == DesireStatus::Pending)
            .reduce(|best, d| if d.intensity > best.intensity { d } else { best })?;
        strongest.status = DesireStatus::Active;
        Some(strongest.clone())
    }

    /// Active → Fulfilled
    pub fn fulfil(&self, id: Uuid) -> bool {
        self.transition(id, DesireStatus::Active, DesireStatus::Fulfilled)
    }

    /// Active → Pending, after a failed or dropped initiative
    pub fn revert(&self, id: Uuid) -> bool {
        self.transition(id, DesireStatus::Active, DesireStatus::Pending)
    }

    fn transition(&self, id: Uuid, from: DesireStatus, to: DesireStatus) -> bool {
        let mut desires = self.desires();
        match desires.iter_mut().find(|d| d.id == id) {
            Some(d) if d.status == from => {
                d.status = to;
                true
            }
            _ => false,
        }
    }

    /// Look up a desire
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Desire> {
        self.desires().iter().find(|d| d.id == id).cloned()
    }

    /// Number of pending desires
    #[must_use]
    pub fn pending(&self) -> usize {
        self.desires()
            .iter()
            .filter(|d| d.status == DesireStatus::Pending)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strongest_first() {
        let board = DesireBoard::new();
        board.add("ask about the weekend", 0.3);
        let strong = board.add("suggest a walk", 0.9);

        let active = board.activate_strongest().unwrap();
        assert_eq!(active.id, strong);
        assert_eq!(board.get(strong).unwrap().status, DesireStatus::Active);
        assert_eq!(board.pending(), 1);
    }

    #[test]
    fn test_fulfil_and_revert() {
        let board = DesireBoard::new();
        let id = board.add("share a fun fact", 0.5);

        // Only active desires move
        assert!(!board.fulfil(id));
        assert!(!board.revert(id));

        board.activate_strongest().unwrap();
        assert!(board.revert(id));
        assert_eq!(board.get(id).unwrap().status, DesireStatus::Pending);

        board.activate_strongest().unwrap();
        assert!(board.fulfil(id));
        assert_eq!(board.get(id).unwrap().status, DesireStatus::Fulfilled);
        assert!(board.activate_strongest().is_none());
    }

    #[test]
    fn test_intensity_clamped() {
        let board = DesireBoard::new();
        let id = board.add("x", 4.0);
        assert!((board.get(id).unwrap().intensity - 1.0).abs() < f32::EPSILON);
    }
}
