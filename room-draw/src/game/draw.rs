//! Draw Engine
//!
//! Resolves one roll into a single ordinal. Preview picks for a spinning
//! animation come from the same engine but never touch the store.

use crate::core::rng::DrawRng;
use crate::game::merge;
use crate::game::state::{Ordinal, ParticipantId, StateStore};

/// Result of a roll request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollOutcome {
    /// The draw settled on an ordinal.
    Settled(Ordinal),
    /// A spin started; settle it to get the ordinal.
    Spinning,
    /// Every item is excluded for the caller.
    NothingAvailable,
    /// A spin is already in progress.
    AlreadyRolling,
}

/// A settled draw, ready to broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettledDraw {
    /// Settled ordinal.
    pub ordinal: Ordinal,
    /// Draw stamp assigned to it.
    pub stamp: u64,
}

/// Picks unclaimed items at random.
#[derive(Debug, Clone, Default)]
pub struct DrawEngine {
    rng: DrawRng,
}

impl DrawEngine {
    /// Create an engine over an RNG.
    pub fn new(rng: DrawRng) -> Self {
        Self { rng }
    }

    /// Ordinals the participant may still draw.
    pub fn available(state: &StateStore, participant: &ParticipantId) -> Vec<Ordinal> {
        let excluded = state.excluded_for(participant);
        state.live_ordinals()
            .into_iter()
            .filter(|o| !excluded.contains(o))
            .collect()
    }

    /// A preview pick for animation. Does not mutate the store.
    pub fn spin_preview(&mut self, state: &StateStore, participant: &ParticipantId) -> Option<Ordinal> {
        let available = Self::available(state, participant);
        self.rng.choose(&available).copied()
    }

    /// Settle a draw and fold it into the store.
    ///
    /// Returns `None` (and leaves the store untouched) when nothing is
    /// available to the participant.
    pub fn settle(&mut self, state: &mut StateStore, participant: &ParticipantId) -> Option<SettledDraw> {
        let available = Self::available(state, participant);
        let ordinal = *self.rng.choose(&available)?;
        let stamp = state.next_draw_stamp();

        merge::apply_roll(state, ordinal, participant, stamp);

        Some(SettledDraw { ordinal, stamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::game::catalog::{Catalog, Category};

    fn store() -> StateStore {
        let catalog = Catalog::new(vec![Category::new("Fixed", &["a", "b", "c"])]);
        StateStore::new(Arc::new(catalog))
    }

    #[test]
    fn test_settle_never_returns_excluded() {
        let me = ParticipantId::new("me");
        let mut engine = DrawEngine::new(DrawRng::new(1));

        for _ in 0..50 {
            let mut state = store();
            merge::apply_toggle_exclude(&mut state, 1, &me, true);
            merge::apply_toggle_exclude(&mut state, 3, &me, true);

            let draw = engine.settle(&mut state, &me).unwrap();
            assert_eq!(draw.ordinal, 2);
            assert_eq!(state.current_ordinal(), Some(2));
            assert!(state.is_excluded_by(2, &me));
            assert_eq!(state.claimants(2), vec![&me]);
        }
    }

    #[test]
    fn test_settle_with_everything_excluded_is_noop() {
        let me = ParticipantId::new("me");
        let mut state = store();
        for ordinal in 1..=3 {
            merge::apply_toggle_exclude(&mut state, ordinal, &me, true);
        }
        let before = state.digest();

        let mut engine = DrawEngine::new(DrawRng::new(1));
        assert!(engine.settle(&mut state, &me).is_none());
        assert!(engine.spin_preview(&state, &me).is_none());
        assert_eq!(state.digest(), before);
    }

    #[test]
    fn test_other_participants_exclusions_do_not_block() {
        let me = ParticipantId::new("me");
        let other = ParticipantId::new("other");
        let mut state = store();
        for ordinal in 1..=3 {
            merge::apply_toggle_exclude(&mut state, ordinal, &other, true);
        }

        assert_eq!(DrawEngine::available(&state, &me), vec![1, 2, 3]);
    }

    #[test]
    fn test_successive_draws_exhaust_pool() {
        let me = ParticipantId::new("me");
        let mut state = store();
        let mut engine = DrawEngine::new(DrawRng::new(42));

        let mut drawn: Vec<Ordinal> = (0..3)
            .map(|_| engine.settle(&mut state, &me).unwrap().ordinal)
            .collect();
        drawn.sort();

        assert_eq!(drawn, vec![1, 2, 3]);
        assert!(engine.settle(&mut state, &me).is_none());
    }

    #[test]
    fn test_stamps_increase() {
        let me = ParticipantId::new("me");
        let mut state = store();
        let mut engine = DrawEngine::new(DrawRng::new(5));

        let first = engine.settle(&mut state, &me).unwrap();
        let second = engine.settle(&mut state, &me).unwrap();
        assert!(second.stamp > first.stamp);
        assert_eq!(state.current_ordinal(), Some(second.ordinal));
    }

    #[test]
    fn test_spin_preview_does_not_mutate() {
        let me = ParticipantId::new("me");
        let state = store();
        let before = state.digest();
        let mut engine = DrawEngine::new(DrawRng::new(3));

        for _ in 0..10 {
            let pick = engine.spin_preview(&state, &me).unwrap();
            assert!((1..=3).contains(&pick));
        }
        assert_eq!(state.digest(), before);
    }
}
