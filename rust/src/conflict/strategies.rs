//! Candidate generation for each resolution strategy.
//!
//! Every generator searches a small neighbourhood of the conflicting game
//! and yields the placements that are clear of other games sharing a venue
//! or team, nearest first. An empty result means the strategy found nothing.

use chrono::{Duration, NaiveDate, NaiveTime};
use rustc_hash::FxHashSet;

use crate::config::DetectorConfig;
use crate::models::{FieldValue, Modification, Schedule, ScheduleSlot, SlotField};

use super::detection::shares_resource;
use super::types::{
    Conflict, Resolution, ResolutionError, ResolutionImpact, ResolutionStatus, ResolutionStrategy,
};

const MAX_TIME_STEPS: i64 = 6;
const HOME_VENUE_LOSS: f64 = -0.1;

/// Modifications, feasibility and rationale of a found placement.
type Placement = (Vec<Modification>, f64, String);

/// Builds concrete resolutions for a conflict.
#[derive(Clone, Debug, Default)]
pub struct ResolutionGenerator {
    config: DetectorConfig,
}

fn modification(slot: &ScheduleSlot, field: SlotField, new_value: FieldValue) -> Modification {
    Modification {
        game_id: slot.game_id.clone(),
        field,
        old_value: slot.field_value(field),
        new_value,
    }
}

fn is_home_venue(schedule: &Schedule, slot: &ScheduleSlot, venue: &str) -> bool {
    slot.teams.iter().any(|t| {
        schedule
            .team(t)
            .and_then(|team| team.home_venue.as_deref())
            == Some(venue)
    })
}

impl ResolutionGenerator {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// The best placement of a strategy, if it has any.
    pub fn generate(
        &self,
        strategy: ResolutionStrategy,
        conflict: &Conflict,
        schedule: &Schedule,
    ) -> Result<Option<Resolution>, ResolutionError> {
        Ok(self
            .generate_alternatives(strategy, conflict, schedule, 1)?
            .into_iter()
            .next())
    }

    /// Up to `limit` placements of a strategy, in search order.
    pub fn generate_alternatives(
        &self,
        strategy: ResolutionStrategy,
        conflict: &Conflict,
        schedule: &Schedule,
        limit: usize,
    ) -> Result<Vec<Resolution>, ResolutionError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        if strategy == ResolutionStrategy::ManualOverride {
            return Ok(vec![self.build(
                strategy,
                conflict,
                schedule,
                Vec::new(),
                0.5,
                "Needs manual review".to_string(),
            )]);
        }

        let target_id = conflict
            .affected_games
            .last()
            .ok_or_else(|| ResolutionError::GenerationFailed {
                strategy,
                reason: "conflict has no affected games".to_string(),
            })?;
        let target = schedule
            .slot(target_id)
            .ok_or_else(|| ResolutionError::UnknownGame(target_id.clone()))?;

        let mut found = match strategy {
            ResolutionStrategy::TimeShift => self.time_shift(target, schedule),
            ResolutionStrategy::VenueSwap => self.venue_swap(target, conflict, schedule),
            ResolutionStrategy::AlternativeVenue => self.alternative_venue(target, schedule),
            ResolutionStrategy::DateSwap => self.date_swap(target, schedule),
            ResolutionStrategy::GameSwap => self.game_swap(target, conflict, schedule),
            ResolutionStrategy::SplitDoubleheader => self.split_doubleheader(conflict, schedule)?,
            ResolutionStrategy::ManualOverride => Vec::new(),
        };
        found.truncate(limit);

        Ok(found
            .into_iter()
            .map(|(modifications, feasibility, rationale)| {
                self.build(strategy, conflict, schedule, modifications, feasibility, rationale)
            })
            .collect())
    }

    fn build(
        &self,
        strategy: ResolutionStrategy,
        conflict: &Conflict,
        schedule: &Schedule,
        modifications: Vec<Modification>,
        feasibility: f64,
        rationale: String,
    ) -> Resolution {
        let mut games: Vec<&str> = modifications.iter().map(|m| m.game_id.as_str()).collect();
        games.sort_unstable();
        games.dedup();

        let mut teams = FxHashSet::default();
        let mut balance = 0.0;
        for game in &games {
            let Some(slot) = schedule.slot(game) else { continue };
            teams.extend(slot.teams.iter().map(String::as_str));
            let moved_venue = modifications.iter().find_map(|m| match (&m.new_value, m.field) {
                (FieldValue::Text(v), SlotField::Venue) if m.game_id == *game => Some(v.as_str()),
                _ => None,
            });
            if let Some(venue) = moved_venue {
                if is_home_venue(schedule, slot, &slot.venue) && !is_home_venue(schedule, slot, venue) {
                    balance += HOME_VENUE_LOSS;
                }
            }
        }

        Resolution {
            id: format!("{}:{}", conflict.id, strategy),
            conflict_id: conflict.id.clone(),
            strategy,
            impact: ResolutionImpact {
                games_modified: games.len(),
                teams_affected: teams.len(),
                cascade_effect: conflict.metadata.cascade_risk,
                competitive_balance_delta: balance,
            },
            modifications,
            feasibility: feasibility.clamp(0.0, 1.0),
            status: ResolutionStatus::Proposed,
            recommendation_score: 0.0,
            rationale,
        }
    }

    /// True if `candidate` would not overlap any other game on its venue or
    /// with its teams, and its venue is open that day.
    fn is_clear(schedule: &Schedule, candidate: &ScheduleSlot, ignore: &[&str]) -> bool {
        let open = schedule
            .venue(&candidate.venue)
            .map_or(true, |v| v.is_available(candidate.date));
        open && schedule
            .slots
            .iter()
            .filter(|s| !ignore.contains(&s.game_id.as_str()))
            .all(|s| !(candidate.overlaps(s) && shares_resource(candidate, s)))
    }

    fn within_day(&self, slot: &ScheduleSlot) -> bool {
        slot.time >= self.config.day_start && slot.end() <= slot.date.and_time(self.config.day_end)
    }

    fn shifted_date(date: NaiveDate, days: i64) -> Option<NaiveDate> {
        date.checked_add_signed(Duration::days(days))
    }

    fn time_shift(&self, target: &ScheduleSlot, schedule: &Schedule) -> Vec<Placement> {
        let step = self.config.time_shift_step_minutes.max(1);
        let mut found = Vec::new();
        for k in 1..=MAX_TIME_STEPS {
            for sign in [1, -1] {
                let start = target.start() + Duration::minutes(sign * k * step);
                if start.date() != target.date {
                    continue;
                }
                let mut moved = target.clone();
                moved.time = start.time();
                if !self.within_day(&moved) || !Self::is_clear(schedule, &moved, &[target.game_id.as_str()]) {
                    continue;
                }
                found.push((
                    vec![modification(target, SlotField::Time, FieldValue::Time(moved.time))],
                    0.9 - 0.05 * k as f64,
                    format!("Move {} to {}", target.game_id, moved.time.format("%H:%M")),
                ));
            }
        }
        found
    }

    fn venue_swap(
        &self,
        target: &ScheduleSlot,
        conflict: &Conflict,
        schedule: &Schedule,
    ) -> Vec<Placement> {
        schedule
            .slots
            .iter()
            .filter(|s| {
                s.date == target.date
                    && s.venue != target.venue
                    && !conflict.affected_games.contains(&s.game_id)
            })
            .filter_map(|other| {
                let ignore = [target.game_id.as_str(), other.game_id.as_str()];
                let mut moved = target.clone();
                moved.venue = other.venue.clone();
                let mut displaced = other.clone();
                displaced.venue = target.venue.clone();
                let clear = Self::is_clear(schedule, &moved, &ignore)
                    && Self::is_clear(schedule, &displaced, &ignore)
                    && !moved.overlaps(&displaced);
                clear.then(|| {
                    (
                        vec![
                            modification(target, SlotField::Venue, FieldValue::Text(other.venue.clone())),
                            modification(other, SlotField::Venue, FieldValue::Text(target.venue.clone())),
                        ],
                        0.75,
                        format!("Swap venues of {} and {}", target.game_id, other.game_id),
                    )
                })
            })
            .collect()
    }

    fn alternative_venue(
        &self,
        target: &ScheduleSlot,
        schedule: &Schedule,
    ) -> Vec<Placement> {
        let mut venues: Vec<&str> = schedule
            .venues
            .iter()
            .map(|v| v.id.as_str())
            .filter(|v| *v != target.venue)
            .collect();
        // home venues first
        venues.sort_by_key(|v| !is_home_venue(schedule, target, v));

        venues
            .into_iter()
            .filter_map(|venue| {
                let mut moved = target.clone();
                moved.venue = venue.to_string();
                if !Self::is_clear(schedule, &moved, &[target.game_id.as_str()]) {
                    return None;
                }
                let feasibility = if is_home_venue(schedule, target, venue) { 0.8 } else { 0.7 };
                Some((
                    vec![modification(target, SlotField::Venue, FieldValue::Text(moved.venue))],
                    feasibility,
                    format!("Move {} to {}", target.game_id, venue),
                ))
            })
            .collect()
    }

    fn date_swap(&self, target: &ScheduleSlot, schedule: &Schedule) -> Vec<Placement> {
        let mut found = Vec::new();
        for d in 1..=self.config.max_date_shift_days {
            for sign in [1, -1] {
                let Some(date) = Self::shifted_date(target.date, sign * d) else { continue };
                let mut moved = target.clone();
                moved.date = date;
                if !Self::is_clear(schedule, &moved, &[target.game_id.as_str()]) {
                    continue;
                }
                found.push((
                    vec![modification(target, SlotField::Date, FieldValue::Date(date))],
                    0.8 - 0.05 * d as f64,
                    format!("Move {} to {}", target.game_id, date),
                ));
            }
        }
        found
    }

    fn game_swap(
        &self,
        target: &ScheduleSlot,
        conflict: &Conflict,
        schedule: &Schedule,
    ) -> Vec<Placement> {
        let mut partners: FxHashSet<String> = FxHashSet::default();
        target
            .teams
            .iter()
            .flat_map(|team| schedule.games_for_team(team))
            .filter(|s| s.date != target.date && !conflict.affected_games.contains(&s.game_id))
            .filter(|s| partners.insert(s.game_id.clone()))
            .filter_map(|other| {
                let ignore = [target.game_id.as_str(), other.game_id.as_str()];
                let mut moved = target.clone();
                moved.date = other.date;
                moved.time = other.time;
                let mut displaced = other.clone();
                displaced.date = target.date;
                displaced.time = target.time;
                let clear = Self::is_clear(schedule, &moved, &ignore)
                    && Self::is_clear(schedule, &displaced, &ignore);
                clear.then(|| {
                    (
                        vec![
                            modification(target, SlotField::Date, FieldValue::Date(other.date)),
                            modification(target, SlotField::Time, FieldValue::Time(other.time)),
                            modification(other, SlotField::Date, FieldValue::Date(target.date)),
                            modification(other, SlotField::Time, FieldValue::Time(target.time)),
                        ],
                        0.7,
                        format!("Swap dates of {} and {}", target.game_id, other.game_id),
                    )
                })
            })
            .collect()
    }

    /// Push the later of two games far enough out for the minimum rest.
    fn split_doubleheader(
        &self,
        conflict: &Conflict,
        schedule: &Schedule,
    ) -> Result<Vec<Placement>, ResolutionError> {
        let mut games = conflict
            .affected_games
            .iter()
            .map(|g| schedule.slot(g).ok_or_else(|| ResolutionError::UnknownGame(g.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        if games.len() < 2 {
            return Ok(Vec::new());
        }
        games.sort_by_key(|s| s.start());
        let (earlier, later) = (games[0], games[games.len() - 1]);

        let needed = self.config.min_rest_days + 1;
        let current = (later.date - earlier.date).num_days();
        let mut found = Vec::new();
        for gap in needed.max(current + 1)..=needed + self.config.max_date_shift_days {
            let Some(date) = Self::shifted_date(earlier.date, gap) else { continue };
            let mut moved = later.clone();
            moved.date = date;
            if Self::is_clear(schedule, &moved, &[later.game_id.as_str()]) {
                found.push((
                    vec![modification(later, SlotField::Date, FieldValue::Date(date))],
                    0.7,
                    format!("Move {} to {} to split it from {}", later.game_id, date, earlier.game_id),
                ));
            }
        }
        Ok(found)
    }
}

/// Parse "HH:MM" for callers building time modifications by hand.
pub fn parse_time(s: &str) -> Result<NaiveTime, ResolutionError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|e| ResolutionError::InvalidModification(format!("bad time '{}': {}", s, e)))
}
