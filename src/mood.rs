//! Assistant mood as a pleasure-arousal-dominance (PAD) vector
//!
//! [`MoodState`] is shared between the prompt builder, which reads a copy,
//! and the background updater, which applies estimates after each turn.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Three affect scalars, each in `[-1, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PadVector {
    pub pleasure: f32,
    pub arousal: f32,
    pub dominance: f32,
}

impl PadVector {
    /// Neutral mood
    pub const NEUTRAL: Self = Self {
        pleasure: 0.0,
        arousal: 0.0,
        dominance: 0.0,
    };

    /// Build a vector, clamping every component into `[-1, 1]`
    ///
    /// NaN components become 0.
    #[must_use]
    pub fn new(pleasure: f32, arousal: f32, dominance: f32) -> Self {
        Self {
            pleasure: clamp_unit(pleasure),
            arousal: clamp_unit(arousal),
            dominance: clamp_unit(dominance),
        }
    }

    /// Move `weight` of the way toward `target`
    #[must_use]
    pub fn blend(self, target: Self, weight: f32) -> Self {
        let w = weight.clamp(0.0, 1.0);
        Self::new(
            self.pleasure + (target.pleasure - self.pleasure) * w,
            self.arousal + (target.arousal - self.arousal) * w,
            self.dominance + (target.dominance - self.dominance) * w,
        )
    }

    /// A coarse word for the prompt
    #[must_use]
    pub fn label(self) -> &'static str {
        const T: f32 = 0.25;
        match (self.pleasure, self.arousal) {
            (p, a) if p >= T && a >= T => "excited",
            (p, _) if p >= T => "content",
            (p, a) if p <= -T && a >= T => "irritated",
            (p, _) if p <= -T => "gloomy",
            (_, a) if a >= T => "alert",
            (_, a) if a <= -T => "sleepy",
            _ => "calm",
        }
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) }
}

/// Shared mood; only reachable through [`MoodState::read`] and [`MoodState::apply`]
#[derive(Debug, Default)]
pub struct MoodState {
    current: RwLock<PadVector>,
}

impl MoodState {
    /// Start from `initial`
    #[must_use]
    pub fn new(initial: PadVector) -> Self {
        Self {
            current: RwLock::new(PadVector::new(
                initial.pleasure,
                initial.arousal,
                initial.dominance,
            )),
        }
    }

    /// Copy of the current mood
    #[must_use]
    pub fn read(&self) -> PadVector {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the mood with `update(current)`, clamped; returns the new value
    pub fn apply(&self, update: impl FnOnce(PadVector) -> PadVector) -> PadVector {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = update(*current);
        *current = PadVector::new(next.pleasure, next.arousal, next.dominance);
        *current
    }
}

/// Estimates how an exchange moves the mood
///
/// Scoring happens off-lock and may await; folding the score into the shared
/// mood happens inside [`MoodState::apply`], so overlapping turns compose.
#[async_trait]
pub trait MoodEstimator: Send + Sync {
    /// The mood this exchange pulls toward, independent of the current mood
    ///
    /// # Errors
    ///
    /// Returns error if estimation fails; the mood is then left unchanged
    async fn target(&self, user: &str, reply: &str) -> Result<PadVector>;

    /// Fold `target` into `current`; called with the mood lock held
    fn blend(&self, current: PadVector, target: PadVector) -> PadVector;
}

const POSITIVE: &[&str] = &[
    "thanks", "thank", "great", "good", "love", "nice", "awesome", "perfect", "happy", "glad",
    "wonderful", "excellent", "cool", "fun", "yes",
];
const NEGATIVE: &[&str] = &[
    "no", "bad", "wrong", "hate", "stupid", "annoying", "sad", "sorry", "terrible", "awful",
    "angry", "tired", "useless", "fail", "failed",
];
const INTENSE: &[&str] = &["now", "urgent", "hurry", "quick", "quickly", "immediately", "asap"];
const DEFERENT: &[&str] = &["please", "could", "would", "maybe", "perhaps"];

/// Scores an exchange against small word lists
///
/// Each turn the mood first decays toward neutral by `decay`, then moves
/// `sensitivity` of the way toward the lexicon score.
#[derive(Debug, Clone, Copy)]
pub struct LexiconMoodEstimator {
    pub decay: f32,
    pub sensitivity: f32,
}

impl Default for LexiconMoodEstimator {
    fn default() -> Self {
        Self {
            decay: 0.1,
            sensitivity: 0.3,
        }
    }
}

impl LexiconMoodEstimator {
    /// Score text on its own, without history
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(text: &str) -> PadVector {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        if words.is_empty() {
            return PadVector::NEUTRAL;
        }

        let count = |list: &[&str]| words.iter().filter(|w| list.contains(&w.as_str())).count() as f32;
        let positive = count(POSITIVE);
        let negative = count(NEGATIVE);
        let intense = count(INTENSE) + text.matches('!').count() as f32;
        let deferent = count(DEFERENT);

        let polar = positive + negative;
        let pleasure = if polar > 0.0 { (positive - negative) / polar } else { 0.0 };
        // Flat, affectless text reads as slightly low energy
        let flat = if polar + intense > 0.0 { 0.0 } else { 0.1 };
        let arousal = (intense / 2.0).min(1.0) - flat;
        let dominance = ((deferent - count(INTENSE)) / 3.0).clamp(-1.0, 1.0);

        PadVector::new(pleasure, arousal, dominance)
    }
}

#[async_trait]
impl MoodEstimator for LexiconMoodEstimator {
    async fn target(&self, user: &str, reply: &str) -> Result<PadVector> {
        // The user's words carry more weight than our own
        Ok(Self::score(reply).blend(Self::score(user), 0.75))
    }

    fn blend(&self, current: PadVector, target: PadVector) -> PadVector {
        current
            .blend(PadVector::NEUTRAL, self.decay)
            .blend(target, self.sensitivity)
    }
}
