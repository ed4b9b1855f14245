//! Actions scheduled for a later time

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a planned action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Scheduled,
    /// Due and handed to the dispatcher
    Triggered,
    Done,
}

/// An action due at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub id: Uuid,
    pub description: String,
    pub due: DateTime<Utc>,
    pub status: ActionStatus,
}

/// In-memory action schedule
#[derive(Debug, Default)]
pub struct ActionPlanner {
    actions: Mutex<Vec<PlannedAction>>,
}

impl ActionPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn actions(&self) -> MutexGuard<'_, Vec<PlannedAction>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `description` for `due`
    pub fn schedule(&self, description: impl Into<String>, due: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let description = description.into();
        tracing::info!(%id, %due, description = %description, "action scheduled");
        self.actions().push(PlannedAction {
            id,
            description,
            due,
            status: ActionStatus::Scheduled,
        });
        id
    }

    /// Mark every scheduled action due at or before `now` as triggered
    ///
    /// Returned in due order.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<PlannedAction> {
        let mut actions = self.actions();
        let mut due: Vec<PlannedAction> = actions
            .iter_mut()
            .filter(|a| a.status == ActionStatus::Scheduled && a.due <= now)
            .map(|a| {
                a.status = ActionStatus::Triggered;
                a.clone()
            })
            .collect();
        due.sort_by_key(|a| a.due);
        due
    }

    /// Triggered → Done
    pub fn complete(&self, id: Uuid) -> bool {
        self.transition(id, ActionStatus::Triggered, ActionStatus::Done)
    }

    /// Triggered → Scheduled, so the next tick retries it
    pub fn revert(&self, id: Uuid) -> bool {
        self.transition(id, ActionStatus::Triggered, ActionStatus::Scheduled)
    }

    fn transition(&self, id: Uuid, from: ActionStatus, to: ActionStatus) -> bool {
        let mut actions = self.actions();
        match actions.iter_mut().find(|a| a.id == id) {
            Some(a) if a.status == from => {
                a.status = to;
                true
            }
            _ => false,
        }
    }

    /// Look up an action
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<PlannedAction> {
        self.actions().iter().find(|a| a.id == id).cloned()
    }

    /// Actions not yet done, soonest first
    #[must_use]
    pub fn upcoming(&self) -> Vec<PlannedAction> {
        let mut upcoming: Vec<PlannedAction> = self
            .actions()
            .iter()
            .filter(|a| a.status != ActionStatus::Done)
            .cloned()
            .collect();
        upcoming.sort_by_key(|a| a.due);
        upcoming
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_take_due_once() {
        let planner = ActionPlanner::new();
        let now = Utc::now();
        let late = planner.schedule("water plants", now - Duration::minutes(1));
        let early = planner.schedule("stretch", now - Duration::minutes(5));
        planner.schedule("call mom", now + Duration::hours(1));

        let due = planner.take_due(now);
        let ids: Vec<Uuid> = due.iter().map(|a| a.id).collect();
        assert_eq!(ids, [early, late]);
        assert!(planner.take_due(now).is_empty());
        assert_eq!(planner.upcoming().len(), 3);
    }

    #[test]
    fn test_revert_reschedules() {
        let planner = ActionPlanner::new();
        let now = Utc::now();
        let id = planner.schedule("stand up", now);

        assert_eq!(planner.take_due(now).len(), 1);
        assert!(planner.revert(id));
        assert_eq!(planner.get(id).unwrap().status, ActionStatus::Scheduled);

        assert_eq!(planner.take_due(now).len(), 1);
        assert!(planner.complete(id));
        assert!(!planner.revert(id));
        assert!(planner.upcoming().is_empty());
    }
}
