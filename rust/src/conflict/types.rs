//! Conflict and resolution data types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::{FieldValue, Modification, ScheduleEditError, SlotField};

/// Kind of schedule-derived incompatibility.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    VenueDoubleBooking,
    TeamDoubleBooking,
    TravelBurden,
    InsufficientRest,
    VenueUnavailable,
    BroadcastWindow,
    RivalrySpacing,
    ResourceContention,
    /// Reported by an external detector; only manual override applies.
    Other(String),
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VenueDoubleBooking => write!(f, "venue_double_booking"),
            Self::TeamDoubleBooking => write!(f, "team_double_booking"),
            Self::TravelBurden => write!(f, "travel_burden"),
            Self::InsufficientRest => write!(f, "insufficient_rest"),
            Self::VenueUnavailable => write!(f, "venue_unavailable"),
            Self::BroadcastWindow => write!(f, "broadcast_window"),
            Self::RivalrySpacing => write!(f, "rivalry_spacing"),
            Self::ResourceContention => write!(f, "resource_contention"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Ordered: `Minor < Major < Critical`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn weight(self) -> f64 {
        match self {
            Self::Minor => 0.3,
            Self::Major => 0.6,
            Self::Critical => 1.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictMetadata {
    /// Estimated likelihood in [0, 1] that repairing this creates further conflicts.
    pub cascade_risk: f64,
    pub historical_frequency: f64,
    pub conflict_score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub description: String,
    pub affected_games: Vec<String>,
    pub affected_teams: Vec<String>,
    pub metadata: ConflictMetadata,
}

impl Conflict {
    pub fn new(
        id: impl Into<String>,
        conflict_type: ConflictType,
        severity: Severity,
        description: impl Into<String>,
        affected_games: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            conflict_type,
            severity,
            description: description.into(),
            affected_games,
            affected_teams: Vec::new(),
            metadata: ConflictMetadata::default(),
        }
    }

    pub fn with_teams(mut self, teams: Vec<String>) -> Self {
        self.affected_teams = teams;
        self
    }

    pub fn with_cascade_risk(mut self, risk: f64) -> Self {
        self.metadata.cascade_risk = risk.clamp(0.0, 1.0);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    /// Move one game to another start time on the same day.
    TimeShift,
    /// Exchange venues with another game on the same day.
    VenueSwap,
    /// Move one game to a free venue.
    AlternativeVenue,
    /// Move one game to a nearby date.
    DateSwap,
    /// Exchange the dates of two games of the same team.
    GameSwap,
    /// Pull two games of a team apart so they get rest in between.
    SplitDoubleheader,
    /// Flag for human review; never applied automatically.
    ManualOverride,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TimeShift => "TIME_SHIFT",
            Self::VenueSwap => "VENUE_SWAP",
            Self::AlternativeVenue => "ALTERNATIVE_VENUE",
            Self::DateSwap => "DATE_SWAP",
            Self::GameSwap => "GAME_SWAP",
            Self::SplitDoubleheader => "SPLIT_DOUBLEHEADER",
            Self::ManualOverride => "MANUAL_OVERRIDE",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionImpact {
    pub games_modified: usize,
    pub teams_affected: usize,
    pub cascade_effect: f64,
    /// Negative when home teams lose home games.
    pub competitive_balance_delta: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Proposed,
    Accepted,
    /// Failed validation; listed in `ResolutionReport::rejected`.
    Rejected,
}

/// A scored repair proposal for one conflict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: String,
    pub conflict_id: String,
    pub strategy: ResolutionStrategy,
    pub modifications: Vec<Modification>,
    /// In [0, 1].
    pub feasibility: f64,
    pub impact: ResolutionImpact,
    pub status: ResolutionStatus,
    pub recommendation_score: f64,
    pub rationale: String,
}

/// Errors raised while analyzing, generating or applying a resolution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Unknown game: {0}")]
    UnknownGame(String),
    #[error("Stale modification for {game_id}.{field}: expected {expected}, found {actual}")]
    StaleModification {
        game_id: String,
        field: SlotField,
        expected: FieldValue,
        actual: FieldValue,
    },
    #[error("Invalid modification: {0}")]
    InvalidModification(String),
    #[error("Strategy {strategy} failed: {reason}")]
    GenerationFailed {
        strategy: ResolutionStrategy,
        reason: String,
    },
    #[error("Conflict analysis failed: {0}")]
    Analysis(String),
}

impl From<ScheduleEditError> for ResolutionError {
    fn from(err: ScheduleEditError) -> Self {
        match err {
            ScheduleEditError::UnknownGame(game) => Self::UnknownGame(game),
            ScheduleEditError::StaleModification {
                game_id,
                field,
                expected,
                actual,
            } => Self::StaleModification {
                game_id,
                field,
                expected,
                actual,
            },
            other @ ScheduleEditError::TypeMismatch { .. } => {
                Self::InvalidModification(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        let mut severities = vec![Severity::Minor, Severity::Critical, Severity::Major];
        severities.sort_by(|a, b| b.cmp(a));
        assert_eq!(severities, vec![Severity::Critical, Severity::Major, Severity::Minor]);
    }

    #[test]
    fn test_conflict_type_display() {
        assert_eq!(ConflictType::VenueDoubleBooking.to_string(), "venue_double_booking");
        assert_eq!(ConflictType::Other("curfew".to_string()).to_string(), "curfew");
        assert_eq!(ResolutionStrategy::TimeShift.to_string(), "TIME_SHIFT");
    }

    #[test]
    fn test_edit_error_conversion() {
        let err: ResolutionError = ScheduleEditError::UnknownGame("g9".to_string()).into();
        assert_eq!(err, ResolutionError::UnknownGame("g9".to_string()));
    }
}
