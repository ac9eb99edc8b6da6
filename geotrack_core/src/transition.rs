//! Condition Transition Model - decides each tracker's next simulated condition.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::condition::Condition;

/// Upper bound (exclusive) of the uniform draw used by the ladder.
pub const DRAW_RANGE: u32 = 0x7fff;

/// Per-rung percentages. Each rung is an independent draw; the first hit
/// wins and a miss on every rung keeps the current condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityLadder {
    pub offline_pct: u32,
    pub normal_pct: u32,
    pub minor_pct: u32,
    pub moderate_pct: u32,
}

impl Default for ProbabilityLadder {
    fn default() -> Self {
        Self {
            offline_pct: 1,
            normal_pct: 20,
            minor_pct: 5,
            moderate_pct: 3,
        }
    }
}

impl ProbabilityLadder {
    /// A ladder that never changes anything (useful for scripted runs).
    pub fn frozen() -> Self {
        Self {
            offline_pct: 0,
            normal_pct: 0,
            minor_pct: 0,
            moderate_pct: 0,
        }
    }

    fn rungs(&self) -> [(Condition, u32); 4] {
        [
            (Condition::Offline, self.offline_pct),
            (Condition::Normal, self.normal_pct),
            (Condition::Minor, self.minor_pct),
            (Condition::Moderate, self.moderate_pct),
        ]
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// An attack override forced the tracker severe
    Forced,
    /// A severe tracker with no active attack goes offline
    AttackResolved,
    /// A ladder rung fired
    Sampled,
    /// No rung fired
    Unchanged,
}

/// The decided next condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub condition: Condition,
    pub cause: TransitionCause,
}

/// Weighted-random condition model with deterministic attack escalation.
///
/// Owns its RNG; seed it from the context for reproducible runs.
pub struct ConditionTransitionModel {
    ladder: ProbabilityLadder,
    rng: ChaCha8Rng,
}

impl ConditionTransitionModel {
    pub fn new(ladder: ProbabilityLadder, rng: ChaCha8Rng) -> Self {
        Self { ladder, rng }
    }

    pub fn ladder(&self) -> &ProbabilityLadder {
        &self.ladder
    }

    /// Decides the next condition for a tracker.
    ///
    /// # Arguments
    /// * `current` - The tracker's current simulated condition
    /// * `forced` - An attack is waiting to fire for this tracker
    ///
    /// The caller commits the result to its simulation state and clears
    /// the force flag when `cause == Forced`.
    pub fn next(&mut self, current: Condition, forced: bool) -> Transition {
        if forced {
            return Transition {
                condition: Condition::Severe,
                cause: TransitionCause::Forced,
            };
        }

        if current == Condition::Severe {
            return Transition {
                condition: Condition::Offline,
                cause: TransitionCause::AttackResolved,
            };
        }

        for (condition, pct) in self.ladder.rungs() {
            if self.hits(pct) {
                return Transition {
                    condition,
                    cause: TransitionCause::Sampled,
                };
            }
        }

        Transition {
            condition: current,
            cause: TransitionCause::Unchanged,
        }
    }

    fn hits(&mut self, pct: u32) -> bool {
        let threshold = DRAW_RANGE * pct.min(100) / 100;
        // Strict: a 0% rung never fires (an inclusive bound would fire on a zero draw).
        self.rng.gen_range(0..DRAW_RANGE) < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn model(ladder: ProbabilityLadder) -> ConditionTransitionModel {
        ConditionTransitionModel::new(ladder, ChaCha8Rng::seed_from_u64(42))
    }

    #[test]
    fn test_forced_always_severe() {
        let mut model = model(ProbabilityLadder::default());
        for current in [Condition::Offline, Condition::Normal, Condition::Severe] {
            let t = model.next(current, true);
            assert_eq!(t.condition, Condition::Severe);
            assert_eq!(t.cause, TransitionCause::Forced);
        }
    }

    #[test]
    fn test_severe_without_attack_goes_offline() {
        let mut model = model(ProbabilityLadder::default());
        let t = model.next(Condition::Severe, false);
        assert_eq!(t.condition, Condition::Offline);
        assert_eq!(t.cause, TransitionCause::AttackResolved);
    }

    #[test]
    fn test_frozen_ladder_keeps_condition() {
        let mut model = model(ProbabilityLadder::frozen());
        for _ in 0..1000 {
            let t = model.next(Condition::Minor, false);
            assert_eq!(t.condition, Condition::Minor);
            assert_eq!(t.cause, TransitionCause::Unchanged);
        }
    }

    #[test]
    fn test_first_certain_rung_wins() {
        let ladder = ProbabilityLadder {
            offline_pct: 0,
            normal_pct: 100,
            minor_pct: 100,
            moderate_pct: 100,
        };
        let mut model = model(ladder);
        assert_eq!(model.next(Condition::Moderate, false).condition, Condition::Normal);
    }

    #[test]
    fn test_sampled_frequencies_follow_ladder() {
        let ladder = ProbabilityLadder {
            offline_pct: 10,
            normal_pct: 0,
            minor_pct: 0,
            moderate_pct: 0,
        };
        let mut model = model(ladder);
        let offline = (0..20_000)
            .filter(|_| model.next(Condition::Normal, false).condition == Condition::Offline)
            .count();

        // 10% +- 1.5%
        assert!((1_700..=2_300).contains(&offline), "offline hits = {}", offline);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = model(ProbabilityLadder::default());
        let mut b = model(ProbabilityLadder::default());
        for _ in 0..500 {
            assert_eq!(a.next(Condition::Normal, false), b.next(Condition::Normal, false));
        }
    }
}
