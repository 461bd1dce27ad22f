//! Conflict detection over a schedule.

use rustc_hash::FxHashSet;

use crate::config::DetectorConfig;
use crate::models::{Schedule, ScheduleSlot};

use super::types::{Conflict, ConflictType, Severity};

/// Finds conflicts in a schedule. Must be deterministic: the same schedule
/// yields the same conflicts with the same ids.
pub trait ConflictDetector: Send + Sync {
    fn detect(&self, schedule: &Schedule) -> Vec<Conflict>;
}

impl<F> ConflictDetector for F
where
    F: Fn(&Schedule) -> Vec<Conflict> + Send + Sync,
{
    fn detect(&self, schedule: &Schedule) -> Vec<Conflict> {
        self(schedule)
    }
}

/// Built-in detector for the common league scheduling conflicts.
#[derive(Clone, Debug, Default)]
pub struct StandardConflictDetector {
    config: DetectorConfig,
}

fn pair_id(kind: &ConflictType, a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}:{}", kind, first, second)
}

fn union_teams(slots: &[&ScheduleSlot]) -> Vec<String> {
    let mut teams: Vec<String> = slots.iter().flat_map(|s| s.teams.iter().cloned()).collect();
    teams.sort();
    teams.dedup();
    teams
}

/// Distinct team ids in order of first appearance.
fn teams_in(schedule: &Schedule) -> Vec<&str> {
    let mut seen = FxHashSet::default();
    schedule
        .slots
        .iter()
        .flat_map(|s| s.teams.iter())
        .filter(|t| seen.insert(t.as_str()))
        .map(String::as_str)
        .collect()
}

/// True if the two games compete for a venue or a team.
pub(crate) fn shares_resource(a: &ScheduleSlot, b: &ScheduleSlot) -> bool {
    a.venue == b.venue || a.teams.iter().any(|t| b.involves_team(t))
}

impl StandardConflictDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn venue_double_bookings(&self, schedule: &Schedule, out: &mut Vec<Conflict>) {
        let slots = &schedule.slots;
        for (i, a) in slots.iter().enumerate() {
            for b in &slots[i + 1..] {
                if a.venue == b.venue && a.overlaps(b) {
                    out.push(
                        Conflict::new(
                            pair_id(&ConflictType::VenueDoubleBooking, &a.game_id, &b.game_id),
                            ConflictType::VenueDoubleBooking,
                            Severity::Critical,
                            format!(
                                "{} and {} overlap at {} on {}",
                                a.game_id, b.game_id, a.venue, a.date
                            ),
                            vec![a.game_id.clone(), b.game_id.clone()],
                        )
                        .with_teams(union_teams(&[a, b])),
                    );
                }
            }
        }
    }

    fn team_double_bookings(&self, schedule: &Schedule, out: &mut Vec<Conflict>) {
        let slots = &schedule.slots;
        for (i, a) in slots.iter().enumerate() {
            for b in &slots[i + 1..] {
                let shared: Vec<String> = a
                    .teams
                    .iter()
                    .filter(|t| b.involves_team(t))
                    .cloned()
                    .collect();
                if shared.is_empty() {
                    continue;
                }
                let severity = if a.overlaps(b) {
                    Severity::Critical
                } else if a.date == b.date {
                    Severity::Major
                } else {
                    continue;
                };
                out.push(
                    Conflict::new(
                        pair_id(&ConflictType::TeamDoubleBooking, &a.game_id, &b.game_id),
                        ConflictType::TeamDoubleBooking,
                        severity,
                        format!(
                            "{} play both {} and {} on {}",
                            shared.join(", "),
                            a.game_id,
                            b.game_id,
                            a.date
                        ),
                        vec![a.game_id.clone(), b.game_id.clone()],
                    )
                    .with_teams(shared),
                );
            }
        }
    }

    /// Rest and travel checks between consecutive games of each team.
    fn team_sequences(&self, schedule: &Schedule, out: &mut Vec<Conflict>) {
        for team in teams_in(schedule) {
            let games = schedule.games_for_team(team);
            for pair in games.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let gap_days = (b.date - a.date).num_days();
                if gap_days == 0 {
                    // same-day games are team double bookings
                    continue;
                }

                let rest_days = gap_days - 1;
                if rest_days < self.config.min_rest_days {
                    out.push(
                        Conflict::new(
                            format!("{}:{}:{}:{}", ConflictType::InsufficientRest, team, a.game_id, b.game_id),
                            ConflictType::InsufficientRest,
                            Severity::Minor,
                            format!(
                                "{} get {} rest day(s) between {} and {} (minimum {})",
                                team, rest_days, a.game_id, b.game_id, self.config.min_rest_days
                            ),
                            vec![a.game_id.clone(), b.game_id.clone()],
                        )
                        .with_teams(vec![team.to_string()]),
                    );
                }

                if gap_days == 1 && a.venue != b.venue {
                    let locations = schedule
                        .venue(&a.venue)
                        .and_then(|v| v.location)
                        .zip(schedule.venue(&b.venue).and_then(|v| v.location));
                    if let Some((from, to)) = locations {
                        let km = from.distance_km(&to);
                        if km > self.config.max_daily_travel_km {
                            out.push(
                                Conflict::new(
                                    format!("{}:{}:{}:{}", ConflictType::TravelBurden, team, a.game_id, b.game_id),
                                    ConflictType::TravelBurden,
                                    Severity::Major,
                                    format!(
                                        "{} travel {:.0} km from {} to {} overnight",
                                        team, km, a.venue, b.venue
                                    ),
                                    vec![a.game_id.clone(), b.game_id.clone()],
                                )
                                .with_teams(vec![team.to_string()]),
                            );
                        }
                    }
                }
            }
        }
    }

    fn venue_unavailability(&self, schedule: &Schedule, out: &mut Vec<Conflict>) {
        for slot in &schedule.slots {
            let Some(venue) = schedule.venue(&slot.venue) else { continue };
            if !venue.is_available(slot.date) {
                out.push(
                    Conflict::new(
                        format!("{}:{}", ConflictType::VenueUnavailable, slot.game_id),
                        ConflictType::VenueUnavailable,
                        Severity::Critical,
                        format!("{} is unavailable on {} for {}", venue.id, slot.date, slot.game_id),
                        vec![slot.game_id.clone()],
                    )
                    .with_teams(union_teams(&[slot])),
                );
            }
        }
    }

    /// Games outside the conflict that share a venue or team with it within a day.
    fn cascade_risk(schedule: &Schedule, conflict: &Conflict) -> f64 {
        let affected: Vec<&ScheduleSlot> = conflict
            .affected_games
            .iter()
            .filter_map(|g| schedule.slot(g))
            .collect();
        let neighbours = schedule
            .slots
            .iter()
            .filter(|s| !conflict.affected_games.contains(&s.game_id))
            .filter(|s| {
                affected.iter().any(|a| {
                    (s.date - a.date).num_days().abs() <= 1 && shares_resource(a, s)
                })
            })
            .count();
        (neighbours as f64 / 4.0).min(1.0)
    }
}

impl ConflictDetector for StandardConflictDetector {
    fn detect(&self, schedule: &Schedule) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        self.venue_double_bookings(schedule, &mut conflicts);
        self.team_double_bookings(schedule, &mut conflicts);
        self.venue_unavailability(schedule, &mut conflicts);
        self.team_sequences(schedule, &mut conflicts);

        for conflict in &mut conflicts {
            let risk = Self::cascade_risk(schedule, conflict);
            conflict.metadata.cascade_risk = risk;
            conflict.metadata.conflict_score = conflict.severity.weight() * (0.5 + 0.5 * risk);
        }
        conflicts
    }
}
