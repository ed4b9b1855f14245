//! Scheduled and autonomous event producers
//!
//! Calendar alerts, planned actions and desire-driven initiative each run on
//! a timer task and offer events to the shared queue. When the queue rejects
//! an event the originating state is rolled back so it is retried later.

mod calendar;
mod desire;
mod planned;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::events::{Event, EventKind, EventSource, PriorityEventQueue};

pub use calendar::{CalendarEntry, CalendarSource, CalendarWatcher, JsonCalendar};
pub use desire::{Desire, DesireBoard, DesireStatus};
pub use planned::{ActionPlanner, ActionStatus, PlannedAction};

/// Activate the strongest pending desire and offer it as an initiative
///
/// Returns whether an event was queued.
pub fn offer_initiative(board: &DesireBoard, queue: &PriorityEventQueue) -> bool {
    let Some(desire) = board.activate_strongest() else {
        tracing::trace!("no pending desires");
        return false;
    };

    let event = Event::new(
        EventKind::Initiative {
            desire_id: desire.id,
        },
        EventSource::Initiative,
    );
    if queue.offer(event) {
        tracing::debug!(desire = %desire.description, "initiative queued");
        true
    } else {
        board.revert(desire.id);
        tracing::warn!(desire = %desire.description, "event queue full, initiative deferred");
        false
    }
}

/// Offer every planned action due at `now`
///
/// Returns how many were queued.
pub fn offer_due_actions(planner: &ActionPlanner, queue: &PriorityEventQueue, now: DateTime<Utc>) -> usize {
    let mut queued = 0;
    for action in planner.take_due(now) {
        let event = Event::new(
            EventKind::PlannedAction {
                action_id: action.id,
            },
            EventSource::Planner,
        );
        if queue.offer(event) {
            queued += 1;
        } else {
            planner.revert(action.id);
            tracing::warn!(action = %action.description, "event queue full, planned action deferred");
        }
    }
    queued
}

/// Offer alerts for calendar entries entering the lead window
///
/// Returns how many were queued.
pub fn offer_calendar_alerts(
    watcher: &CalendarWatcher,
    queue: &PriorityEventQueue,
    now: DateTime<Utc>,
) -> usize {
    let entries = match watcher.due_alerts(now) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read calendar");
            return 0;
        }
    };

    let mut queued = 0;
    for entry in entries {
        let id = entry.id.clone();
        let title = entry.title.clone();
        if queue.offer(Event::new(EventKind::CalendarAlert { entry }, EventSource::Calendar)) {
            queued += 1;
        } else {
            watcher.forget(&id);
            tracing::warn!(entry = %title, "event queue full, calendar alert deferred");
        }
    }
    queued
}

/// Random delay in `[base, base + jitter]`
#[must_use]
pub fn jittered(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    #[allow(clippy::cast_possible_truncation)]
    let max_ms = jitter.as_millis().min(u128::from(u64::MAX)) as u64;
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Wait for `delay`; false if shutdown fired first
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}

/// Offer initiatives at jittered intervals until shutdown
pub async fn run_initiative_timer(
    board: Arc<DesireBoard>,
    queue: Arc<PriorityEventQueue>,
    interval: Duration,
    jitter: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(?interval, ?jitter, "initiative timer started");
    while sleep_or_shutdown(jittered(interval, jitter), &mut shutdown).await {
        offer_initiative(&board, &queue);
    }
    tracing::debug!("initiative timer stopped");
}

/// Poll the planner every `tick` until shutdown
pub async fn run_planner_timer(
    planner: Arc<ActionPlanner>,
    queue: Arc<PriorityEventQueue>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let queued = offer_due_actions(&planner, &queue, Utc::now());
                if queued > 0 {
                    tracing::debug!(queued, "planned actions queued");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("planner timer stopped");
}

/// Poll the calendar every `tick` until shutdown
pub async fn run_calendar_timer(
    watcher: Arc<CalendarWatcher>,
    queue: Arc<PriorityEventQueue>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let queued = offer_calendar_alerts(&watcher, &queue, Utc::now());
                if queued > 0 {
                    tracing::debug!(queued, "calendar alerts queued");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("calendar timer stopped");
}
