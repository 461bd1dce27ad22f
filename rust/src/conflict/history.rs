//! Rolling outcome history per (conflict type, strategy).

use rustc_hash::FxHashMap;
use std::collections::VecDeque;

use super::types::{ConflictType, ResolutionStrategy};

/// Remembers how well each strategy worked for each conflict type.
///
/// Only the most recent `window` outcomes per pair count towards the rate.
#[derive(Clone, Debug)]
pub struct ResolutionHistory {
    window: usize,
    outcomes: FxHashMap<(ConflictType, ResolutionStrategy), VecDeque<bool>>,
    /// All recorded attempts per conflict type, not windowed.
    frequency: FxHashMap<ConflictType, usize>,
}

impl Default for ResolutionHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

impl ResolutionHistory {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            outcomes: FxHashMap::default(),
            frequency: FxHashMap::default(),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn record(&mut self, conflict_type: &ConflictType, strategy: ResolutionStrategy, success: bool) {
        let outcomes = self
            .outcomes
            .entry((conflict_type.clone(), strategy))
            .or_default();
        outcomes.push_back(success);
        while outcomes.len() > self.window {
            outcomes.pop_front();
        }
        *self.frequency.entry(conflict_type.clone()).or_insert(0) += 1;
    }

    /// Success rate over the window, `None` without data.
    pub fn success_rate(&self, conflict_type: &ConflictType, strategy: ResolutionStrategy) -> Option<f64> {
        let outcomes = self.outcomes.get(&(conflict_type.clone(), strategy))?;
        if outcomes.is_empty() {
            return None;
        }
        let successes = outcomes.iter().filter(|&&ok| ok).count();
        Some(successes as f64 / outcomes.len() as f64)
    }

    /// Outcomes currently in the window for a pair.
    pub fn attempts(&self, conflict_type: &ConflictType, strategy: ResolutionStrategy) -> usize {
        self.outcomes
            .get(&(conflict_type.clone(), strategy))
            .map_or(0, VecDeque::len)
    }

    /// How often conflicts of this type have been worked on.
    pub fn conflict_frequency(&self, conflict_type: &ConflictType) -> usize {
        self.frequency.get(conflict_type).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.frequency.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_success_rate() {
        let mut history = ResolutionHistory::new(3);
        let venue = ConflictType::VenueDoubleBooking;
        assert!(history.success_rate(&venue, ResolutionStrategy::TimeShift).is_none());

        history.record(&venue, ResolutionStrategy::TimeShift, false);
        history.record(&venue, ResolutionStrategy::TimeShift, true);
        history.record(&venue, ResolutionStrategy::TimeShift, true);
        history.record(&venue, ResolutionStrategy::TimeShift, true);

        // the initial failure fell out of the window
        assert_eq!(history.success_rate(&venue, ResolutionStrategy::TimeShift), Some(1.0));
        assert_eq!(history.attempts(&venue, ResolutionStrategy::TimeShift), 3);
        assert_eq!(history.conflict_frequency(&venue), 4);
        assert_eq!(history.attempts(&venue, ResolutionStrategy::DateSwap), 0);
    }

    #[test]
    fn test_pairs_are_independent() {
        let mut history = ResolutionHistory::default();
        history.record(&ConflictType::TravelBurden, ResolutionStrategy::GameSwap, false);
        history.record(&ConflictType::VenueDoubleBooking, ResolutionStrategy::GameSwap, true);
        assert_eq!(
            history.success_rate(&ConflictType::TravelBurden, ResolutionStrategy::GameSwap),
            Some(0.0)
        );
        history.clear();
        assert!(history.is_empty());
    }
}
