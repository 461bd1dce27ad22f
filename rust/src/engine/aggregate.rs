//! Score aggregation and suggestion merging.

use rustc_hash::FxHashMap;

use crate::models::{Hardness, ResultStatus, Suggestion};

use super::ConstraintOutcome;

/// Overall score and whether every hard constraint held.
///
/// Any violated hard constraint vetoes the schedule: the score is 0.
/// Otherwise the score is the weighted mean of soft and preference scores
/// (weight times hardness multiplier), or 1.0 when there are none.
/// Errored constraints carry no result and are left out of the score, but an
/// errored hard constraint still means the hard constraints are not known
/// to hold.
pub(crate) fn overall_score(outcomes: &[ConstraintOutcome]) -> (f64, bool) {
    let hard_violated = outcomes.iter().any(|o| {
        o.hardness == Hardness::Hard
            && o.result
                .as_ref()
                .is_some_and(|r| r.status == ResultStatus::Violated)
    });
    if hard_violated {
        return (0.0, false);
    }

    let hard_unchecked = outcomes
        .iter()
        .any(|o| o.hardness == Hardness::Hard && o.result.is_none());

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for o in outcomes.iter().filter(|o| o.hardness != Hardness::Hard) {
        let Some(result) = &o.result else { continue };
        let w = o.weight.max(0.0) * o.hardness.score_multiplier();
        weighted += w * result.score;
        total_weight += w;
    }
    let score = if total_weight > 0.0 {
        (weighted / total_weight).clamp(0.0, 1.0)
    } else {
        1.0
    };
    (score, !hard_unchecked)
}

/// Collapse suggestions with the same kind, description and target games,
/// keeping the highest priority. Highest priority first; ties keep first-seen order.
pub(crate) fn merge_suggestions<'a, I>(suggestions: I) -> Vec<Suggestion>
where
    I: IntoIterator<Item = &'a Suggestion>,
{
    let mut merged: Vec<Suggestion> = Vec::new();
    let mut seen: FxHashMap<(String, String, Vec<String>), usize> = FxHashMap::default();

    for s in suggestions {
        let mut games = s.game_ids.clone();
        games.sort();
        let key = (s.kind.clone(), s.description.clone(), games);
        match seen.get(&key) {
            Some(&i) => {
                if s.priority > merged[i].priority {
                    merged[i].priority = s.priority;
                }
            }
            None => {
                seen.insert(key, merged.len());
                merged.push(s.clone());
            }
        }
    }
    merged.sort_by(|a, b| b.priority.cmp(&a.priority));
    merged
}
