//! Background state updates after each completed turn
//!
//! Fire-and-forget: failures are logged, never returned to the turn.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::context::Exchange;
use crate::memory::MemoryFormer;
use crate::mood::{MoodEstimator, MoodState};

/// Lets an action through at most once per interval
#[derive(Debug)]
pub struct Debounce {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Debounce {
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Claim the slot at `now`; false if the previous claim is too recent
    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Spawns the mood and memory updaters
#[derive(Clone)]
pub struct BackgroundUpdaters {
    mood: Arc<MoodState>,
    estimator: Arc<dyn MoodEstimator>,
    former: Option<Arc<MemoryFormer>>,
    debounce: Arc<Debounce>,
}

impl BackgroundUpdaters {
    /// `former` is `None` when memory formation is disabled
    #[must_use]
    pub fn new(
        mood: Arc<MoodState>,
        estimator: Arc<dyn MoodEstimator>,
        former: Option<Arc<MemoryFormer>>,
        memory_interval: Duration,
    ) -> Self {
        Self {
            mood,
            estimator,
            former,
            debounce: Arc::new(Debounce::new(memory_interval)),
        }
    }

    /// Start updates for a finished exchange
    ///
    /// Returns the spawned tasks; callers normally drop them.
    pub fn turn_completed(&self, exchange: Exchange) -> Vec<JoinHandle<()>> {
        let exchange = Arc::new(exchange);
        let mut tasks = Vec::with_capacity(2);

        let mood = Arc::clone(&self.mood);
        let estimator = Arc::clone(&self.estimator);
        let ex = Arc::clone(&exchange);
        tasks.push(tokio::spawn(async move {
            match estimator.target(&ex.user, &ex.reply).await {
                Ok(target) => {
                    let applied = mood.apply(|current| estimator.blend(current, target));
                    tracing::debug!(mood = ?applied, label = applied.label(), "mood updated");
                }
                Err(e) => tracing::warn!(error = %e, "mood estimation failed"),
            }
        }));

        if let Some(former) = &self.former {
            if self.debounce.try_acquire(Instant::now()) {
                let former = Arc::clone(former);
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = former.form(&exchange).await {
                        tracing::warn!(error = %e, "memory formation failed");
                    }
                }));
            } else {
                tracing::trace!("memory formation debounced");
            }
        }

        tasks
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::mood::PadVector;

    /// Slow estimator that adds a fixed step to pleasure
    struct StepEstimator;

    #[async_trait]
    impl MoodEstimator for StepEstimator {
        async fn target(&self, _user: &str, _reply: &str) -> crate::Result<PadVector> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(PadVector::new(0.3, 0.0, 0.0))
        }

        fn blend(&self, current: PadVector, target: PadVector) -> PadVector {
            PadVector::new(current.pleasure + target.pleasure, current.arousal, current.dominance)
        }
    }

    fn exchange() -> Exchange {
        Exchange {
            user: "hi".to_string(),
            reply: "hello".to_string(),
        }
    }

    #[test]
    fn test_debounce_window() {
        let debounce = Debounce::new(Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(debounce.try_acquire(t0));
        assert!(!debounce.try_acquire(t0 + Duration::from_secs(30)));
        assert!(debounce.try_acquire(t0 + Duration::from_secs(61)));
    }

    #[test]
    fn test_zero_interval_always_passes() {
        let debounce = Debounce::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(debounce.try_acquire(t0));
        assert!(debounce.try_acquire(t0));
    }

    #[tokio::test]
    async fn test_mood_task_applies_estimate() {
        let mood = Arc::new(MoodState::default());
        let updaters = BackgroundUpdaters::new(
            Arc::clone(&mood),
            Arc::new(crate::mood::LexiconMoodEstimator::default()),
            None,
            Duration::from_secs(60),
        );

        let tasks = updaters.turn_completed(Exchange {
            user: "thanks, that's great".to_string(),
            reply: "Glad to help!".to_string(),
        });
        assert_eq!(tasks.len(), 1);
        for task in tasks {
            task.await.unwrap();
        }

        assert!(mood.read().pleasure > 0.0);
    }

    #[tokio::test]
    async fn test_overlapping_turns_both_apply() {
        let mood = Arc::new(MoodState::default());
        let updaters = BackgroundUpdaters::new(
            Arc::clone(&mood),
            Arc::new(StepEstimator),
            None,
            Duration::from_secs(60),
        );

        let first = updaters.turn_completed(exchange());
        let second = updaters.turn_completed(exchange());
        for task in first.into_iter().chain(second) {
            task.await.unwrap();
        }

        assert!((mood.read().pleasure - 0.6).abs() < 1e-5);
    }
}
