//! Conflict analysis: pattern, impact and ranked candidate strategies.

use serde::{Deserialize, Serialize};

use crate::models::Schedule;

use super::history::ResolutionHistory;
use super::types::{Conflict, ConflictType, ResolutionError, ResolutionStrategy};

/// Success rate assumed for strategies without history.
const PRIOR_SUCCESS_RATE: f64 = 0.5;
const BASE_WEIGHT: f64 = 0.6;
const HISTORY_WEIGHT: f64 = 0.4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPattern {
    Isolated,
    /// This conflict type keeps coming back.
    Recurring,
    /// Repairing it is likely to disturb neighbouring games.
    Cascading,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub games_affected: usize,
    pub teams_affected: usize,
    pub venues_affected: usize,
    /// Severity weight scaled up by cascade risk.
    pub severity_score: f64,
}

/// A strategy worth trying, with the score it was ranked by.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyCandidate {
    pub strategy: ResolutionStrategy,
    pub base_score: f64,
    pub historical_success_rate: f64,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictAnalysis {
    pub conflict_id: String,
    pub pattern: ConflictPattern,
    pub impact: ImpactAssessment,
    pub cascade_risk: f64,
    /// Best candidate first.
    pub candidates: Vec<StrategyCandidate>,
}

#[derive(Clone, Debug, Default)]
pub struct ConflictAnalyzer;

impl ConflictAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Strategies that can address a conflict type, most natural first.
    pub fn strategies_for(conflict_type: &ConflictType) -> &'static [ResolutionStrategy] {
        use ResolutionStrategy::*;
        match conflict_type {
            ConflictType::VenueDoubleBooking | ConflictType::VenueUnavailable => {
                &[TimeShift, VenueSwap, AlternativeVenue, DateSwap]
            }
            ConflictType::TravelBurden => &[GameSwap, DateSwap, SplitDoubleheader],
            ConflictType::InsufficientRest => &[DateSwap, GameSwap, SplitDoubleheader],
            ConflictType::TeamDoubleBooking => &[TimeShift, DateSwap, GameSwap],
            ConflictType::BroadcastWindow => &[TimeShift, DateSwap],
            ConflictType::RivalrySpacing => &[DateSwap, GameSwap],
            ConflictType::ResourceContention => &[TimeShift, AlternativeVenue],
            ConflictType::Other(_) => &[ManualOverride],
        }
    }

    pub fn analyze(
        &self,
        conflict: &Conflict,
        schedule: &Schedule,
        history: &ResolutionHistory,
    ) -> Result<ConflictAnalysis, ResolutionError> {
        let mut venues = Vec::new();
        for game in &conflict.affected_games {
            let slot = schedule
                .slot(game)
                .ok_or_else(|| ResolutionError::UnknownGame(game.clone()))?;
            if !venues.contains(&slot.venue) {
                venues.push(slot.venue.clone());
            }
        }

        let risk = conflict.metadata.cascade_risk.clamp(0.0, 1.0);
        let pattern = if risk >= 0.5 {
            ConflictPattern::Cascading
        } else if history.conflict_frequency(&conflict.conflict_type) >= 3 {
            ConflictPattern::Recurring
        } else {
            ConflictPattern::Isolated
        };

        let impact = ImpactAssessment {
            games_affected: conflict.affected_games.len(),
            teams_affected: conflict.affected_teams.len(),
            venues_affected: venues.len(),
            severity_score: conflict.severity.weight() * (1.0 + risk),
        };

        let mut candidates: Vec<StrategyCandidate> = Self::strategies_for(&conflict.conflict_type)
            .iter()
            .enumerate()
            .map(|(i, &strategy)| {
                let base_score = 1.0 - 0.1 * i as f64;
                let rate = history
                    .success_rate(&conflict.conflict_type, strategy)
                    .unwrap_or(PRIOR_SUCCESS_RATE);
                StrategyCandidate {
                    strategy,
                    base_score,
                    historical_success_rate: rate,
                    score: BASE_WEIGHT * base_score + HISTORY_WEIGHT * rate,
                }
            })
            .collect();
        // stable: equal scores keep the natural order
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        Ok(ConflictAnalysis {
            conflict_id: conflict.id.clone(),
            pattern,
            impact,
            cascade_risk: risk,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::types::Severity;
    use crate::models::ScheduleSlot;
    use chrono::{NaiveDate, NaiveTime};

    fn schedule() -> Schedule {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let time = NaiveTime::from_hms_opt(19, 0, 0).unwrap();
        Schedule::new("s").with_slots(vec![
            ScheduleSlot::new("g1", date, time, "arena", vec!["a".into(), "b".into()]),
            ScheduleSlot::new("g2", date, time, "arena", vec!["c".into(), "d".into()]),
        ])
    }

    fn venue_conflict() -> Conflict {
        Conflict::new(
            "venue_double_booking:g1:g2",
            ConflictType::VenueDoubleBooking,
            Severity::Critical,
            "overlap",
            vec!["g1".to_string(), "g2".to_string()],
        )
        .with_teams(vec!["a".into(), "b".into(), "c".into(), "d".into()])
    }

    #[test]
    fn test_natural_order_without_history() {
        let analysis = ConflictAnalyzer::new()
            .analyze(&venue_conflict(), &schedule(), &ResolutionHistory::default())
            .unwrap();
        let order: Vec<_> = analysis.candidates.iter().map(|c| c.strategy).collect();
        assert_eq!(
            order,
            vec![
                ResolutionStrategy::TimeShift,
                ResolutionStrategy::VenueSwap,
                ResolutionStrategy::AlternativeVenue,
                ResolutionStrategy::DateSwap,
            ]
        );
        assert!((analysis.candidates[0].score - 0.8).abs() < 1e-9);
        assert_eq!(analysis.pattern, ConflictPattern::Isolated);
        assert_eq!(analysis.impact.venues_affected, 1);
        assert_eq!(analysis.impact.teams_affected, 4);
    }

    #[test]
    fn test_history_reorders_candidates() {
        let mut history = ResolutionHistory::default();
        for _ in 0..4 {
            history.record(&ConflictType::VenueDoubleBooking, ResolutionStrategy::TimeShift, false);
        }
        history.record(&ConflictType::VenueDoubleBooking, ResolutionStrategy::VenueSwap, true);

        let analysis = ConflictAnalyzer::new()
            .analyze(&venue_conflict(), &schedule(), &history)
            .unwrap();
        // venue swap: 0.6*0.9 + 0.4*1.0 = 0.94 ; time shift: 0.6*1.0 + 0 = 0.6
        assert_eq!(analysis.candidates[0].strategy, ResolutionStrategy::VenueSwap);
        assert_eq!(analysis.candidates.last().unwrap().strategy, ResolutionStrategy::TimeShift);
        assert_eq!(analysis.pattern, ConflictPattern::Recurring);
    }

    #[test]
    fn test_cascading_and_unknown_games() {
        let analyzer = ConflictAnalyzer::new();
        let cascading = venue_conflict().with_cascade_risk(0.75);
        let analysis = analyzer
            .analyze(&cascading, &schedule(), &ResolutionHistory::default())
            .unwrap();
        assert_eq!(analysis.pattern, ConflictPattern::Cascading);

        let ghost = Conflict::new(
            "ghost",
            ConflictType::VenueUnavailable,
            Severity::Critical,
            "missing",
            vec!["g9".to_string()],
        );
        assert_eq!(
            analyzer.analyze(&ghost, &schedule(), &ResolutionHistory::default()),
            Err(ResolutionError::UnknownGame("g9".to_string()))
        );
    }

    #[test]
    fn test_other_conflicts_only_allow_manual_override() {
        assert_eq!(
            ConflictAnalyzer::strategies_for(&ConflictType::Other("curfew".into())),
            &[ResolutionStrategy::ManualOverride]
        );
    }
}
