//! Core data types for constraint evaluation: schedules, constraints and results.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rustc_hash::{FxHashSet, FxHasher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

/// Category of a constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintType {
    Temporal,
    Spatial,
    Logical,
    Performance,
    Compliance,
}

impl ConstraintType {
    /// Fixed ordering used when grouping constraints by type.
    pub fn rank(self) -> usize {
        match self {
            Self::Temporal => 0,
            Self::Spatial => 1,
            Self::Logical => 2,
            Self::Performance => 3,
            Self::Compliance => 4,
        }
    }
}

/// How strictly a constraint must hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Hardness {
    /// Must hold; a violation vetoes the whole schedule.
    Hard,
    /// Scored, non-fatal.
    Soft,
    /// Weak scored signal.
    Preference,
}

impl Hardness {
    /// Evaluation order when grouping by hardness (hard constraints first).
    pub fn rank(self) -> usize {
        match self {
            Self::Hard => 0,
            Self::Soft => 1,
            Self::Preference => 2,
        }
    }

    /// Multiplier applied to a constraint's weight when aggregating scores.
    pub fn score_multiplier(self) -> f64 {
        match self {
            Self::Hard | Self::Soft => 1.0,
            Self::Preference => 0.5,
        }
    }
}

/// Teams and venues a constraint applies to. An empty scope is global.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintScope {
    pub teams: Vec<String>,
    pub venues: Vec<String>,
}

impl ConstraintScope {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn is_global(&self) -> bool {
        self.teams.is_empty() && self.venues.is_empty()
    }

    /// True if the scope is global or names any of the given entities.
    pub fn intersects(&self, entities: &FxHashSet<String>) -> bool {
        self.is_global()
            || self
                .teams
                .iter()
                .chain(self.venues.iter())
                .any(|id| entities.contains(id))
    }

    /// True if the scope is global or covers the slot's venue or one of its teams.
    pub fn covers_slot(&self, slot: &ScheduleSlot) -> bool {
        self.is_global()
            || self.venues.iter().any(|v| *v == slot.venue)
            || slot.teams.iter().any(|t| self.teams.contains(t))
    }
}

/// Authoring metadata. Only `updated_at` and `version` change after load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintMetadata {
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ConstraintMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            tags: Vec::new(),
            author: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Error raised by a single constraint's evaluation capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("constraint '{constraint_id}' failed to evaluate: {message}")]
pub struct EvaluationError {
    pub constraint_id: String,
    pub message: String,
}

impl EvaluationError {
    pub fn new(constraint_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            constraint_id: constraint_id.into(),
            message: message.into(),
        }
    }
}

/// Pluggable evaluation logic attached to a constraint.
///
/// Implementations must be pure: the same schedule and slot always produce the
/// same result. Cached results are keyed by the whole schedule's
/// [`ScheduleFingerprint`], so an evaluator may read any game, not just `slot`.
pub trait ConstraintEvaluator: Send + Sync {
    fn evaluate(
        &self,
        schedule: &Schedule,
        slot: &ScheduleSlot,
    ) -> Result<ConstraintResult, EvaluationError>;
}

impl<F> ConstraintEvaluator for F
where
    F: Fn(&Schedule, &ScheduleSlot) -> Result<ConstraintResult, EvaluationError> + Send + Sync,
{
    fn evaluate(
        &self,
        schedule: &Schedule,
        slot: &ScheduleSlot,
    ) -> Result<ConstraintResult, EvaluationError> {
        self(schedule, slot)
    }
}

/// Pin a closure's signature so it can be used as an evaluator without annotations.
pub fn evaluator_fn<F>(f: F) -> F
where
    F: Fn(&Schedule, &ScheduleSlot) -> Result<ConstraintResult, EvaluationError> + Send + Sync,
{
    f
}

/// Placeholder capability for constraints deserialized without logic attached.
struct UnboundEvaluator;

impl ConstraintEvaluator for UnboundEvaluator {
    fn evaluate(
        &self,
        _schedule: &Schedule,
        slot: &ScheduleSlot,
    ) -> Result<ConstraintResult, EvaluationError> {
        Err(EvaluationError::new(
            "",
            format!("no evaluation capability bound (slot {})", slot.game_id),
        ))
    }
}

fn unbound_evaluator() -> Arc<dyn ConstraintEvaluator> {
    Arc::new(UnboundEvaluator)
}

/// A declarative constraint with an attached evaluation capability.
#[derive(Clone, Serialize, Deserialize)]
pub struct UnifiedConstraint {
    pub id: String,
    pub name: String,
    pub constraint_type: ConstraintType,
    pub hardness: Hardness,
    pub weight: f64,
    pub scope: ConstraintScope,
    pub parameters: serde_json::Value,
    /// Ids of constraints that must be evaluated before this one.
    pub dependencies: Vec<String>,
    pub metadata: ConstraintMetadata,
    #[serde(skip, default = "unbound_evaluator")]
    evaluator: Arc<dyn ConstraintEvaluator>,
}

impl UnifiedConstraint {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        constraint_type: ConstraintType,
        hardness: Hardness,
        evaluator: impl ConstraintEvaluator + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            constraint_type,
            hardness,
            weight: 1.0,
            scope: ConstraintScope::global(),
            parameters: serde_json::Value::Null,
            dependencies: Vec::new(),
            metadata: ConstraintMetadata::default(),
            evaluator: Arc::new(evaluator),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_scope(mut self, scope: ConstraintScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Attach (or replace) the evaluation capability, e.g. after deserializing.
    pub fn with_evaluator(mut self, evaluator: impl ConstraintEvaluator + 'static) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    /// Mark the constraint as edited. Bumps the version so cached results go stale.
    pub fn touch(&mut self) {
        self.metadata.version += 1;
        self.metadata.updated_at = Utc::now();
    }

    pub fn applies_to(&self, slot: &ScheduleSlot) -> bool {
        self.scope.covers_slot(slot)
    }

    /// Run the evaluation capability, tagging errors with this constraint's id.
    pub fn evaluate(
        &self,
        schedule: &Schedule,
        slot: &ScheduleSlot,
    ) -> Result<ConstraintResult, EvaluationError> {
        self.evaluator.evaluate(schedule, slot).map_err(|mut e| {
            if e.constraint_id.is_empty() {
                e.constraint_id = self.id.clone();
            }
            e
        })
    }
}

impl fmt::Debug for UnifiedConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnifiedConstraint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("constraint_type", &self.constraint_type)
            .field("hardness", &self.hardness)
            .field("weight", &self.weight)
            .field("dependencies", &self.dependencies)
            .field("version", &self.metadata.version)
            .finish()
    }
}

/// Broadcast assignment of a game.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BroadcastInfo {
    pub network: String,
    pub window: Option<String>,
}

/// One candidate placement of a game.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub game_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u32,
    pub venue: String,
    pub sport: String,
    pub teams: Vec<String>,
    pub conference: Option<String>,
    pub broadcast: Option<BroadcastInfo>,
    pub required_resources: Vec<String>,
}

impl ScheduleSlot {
    pub fn new(
        game_id: impl Into<String>,
        date: NaiveDate,
        time: NaiveTime,
        venue: impl Into<String>,
        teams: Vec<String>,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            date,
            time,
            duration_minutes: 120,
            venue: venue.into(),
            sport: String::new(),
            teams,
            conference: None,
            broadcast: None,
            required_resources: Vec::new(),
        }
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn with_sport(mut self, sport: impl Into<String>) -> Self {
        self.sport = sport.into();
        self
    }

    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start() + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// True if the two games occupy overlapping time intervals.
    pub fn overlaps(&self, other: &ScheduleSlot) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }

    pub fn involves_team(&self, team_id: &str) -> bool {
        self.teams.iter().any(|t| t == team_id)
    }

    pub fn field_value(&self, field: SlotField) -> FieldValue {
        match field {
            SlotField::Date => FieldValue::Date(self.date),
            SlotField::Time => FieldValue::Time(self.time),
            SlotField::Venue => FieldValue::Text(self.venue.clone()),
        }
    }

    fn set_field(&mut self, field: SlotField, value: &FieldValue) -> Result<(), ScheduleEditError> {
        match (field, value) {
            (SlotField::Date, FieldValue::Date(d)) => self.date = *d,
            (SlotField::Time, FieldValue::Time(t)) => self.time = *t,
            (SlotField::Venue, FieldValue::Text(v)) => self.venue = v.clone(),
            _ => {
                return Err(ScheduleEditError::TypeMismatch {
                    game_id: self.game_id.clone(),
                    field,
                })
            }
        }
        Ok(())
    }
}

/// Geographic location in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub conference: Option<String>,
    pub home_venue: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub location: Option<GeoPoint>,
    pub capacity: Option<u32>,
    pub unavailable_dates: Vec<NaiveDate>,
}

impl Venue {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            location: None,
            capacity: None,
            unavailable_dates: Vec::new(),
        }
    }

    pub fn is_available(&self, date: NaiveDate) -> bool {
        !self.unavailable_dates.contains(&date)
    }
}

/// Field of a slot that a resolution may change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotField {
    Date,
    Time,
    Venue,
}

impl fmt::Display for SlotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date => write!(f, "date"),
            Self::Time => write!(f, "time"),
            Self::Venue => write!(f, "venue"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    Date(NaiveDate),
    Time(NaiveTime),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Time(t) => write!(f, "{}", t.format("%H:%M")),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A field-level change to one game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub game_id: String,
    pub field: SlotField,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
}

/// Errors from applying modifications to a schedule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleEditError {
    #[error("Unknown game: {0}")]
    UnknownGame(String),
    #[error("Stale modification for {game_id}.{field}: expected {expected}, found {actual}")]
    StaleModification {
        game_id: String,
        field: SlotField,
        expected: FieldValue,
        actual: FieldValue,
    },
    #[error("Value type does not match field {field} of game {game_id}")]
    TypeMismatch { game_id: String, field: SlotField },
}

/// Content hash of a schedule, taken once per evaluation run.
///
/// Covers the schedule id, its version and every field an evaluator can read
/// (slots, teams, venues). Any edit, including direct field writes that skip
/// [`Schedule::apply_modifications`], changes the fingerprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScheduleFingerprint(u64);

/// A schedule: the unit of evaluation and mutation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub slots: Vec<ScheduleSlot>,
    pub teams: Vec<Team>,
    pub venues: Vec<Venue>,
    /// Logical version, bumped by every applied transaction.
    pub version: u64,
}

impl Schedule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_slots(mut self, slots: Vec<ScheduleSlot>) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_venues(mut self, venues: Vec<Venue>) -> Self {
        self.venues = venues;
        self
    }

    pub fn with_teams(mut self, teams: Vec<Team>) -> Self {
        self.teams = teams;
        self
    }

    pub fn slot(&self, game_id: &str) -> Option<&ScheduleSlot> {
        self.slots.iter().find(|s| s.game_id == game_id)
    }

    pub fn venue(&self, venue_id: &str) -> Option<&Venue> {
        self.venues.iter().find(|v| v.id == venue_id)
    }

    pub fn team(&self, team_id: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == team_id)
    }

    pub fn fingerprint(&self) -> ScheduleFingerprint {
        let mut hasher = FxHasher::default();
        self.id.hash(&mut hasher);
        self.version.hash(&mut hasher);
        self.slots.hash(&mut hasher);
        for team in &self.teams {
            team.id.hash(&mut hasher);
            team.conference.hash(&mut hasher);
            team.home_venue.hash(&mut hasher);
        }
        for venue in &self.venues {
            venue.id.hash(&mut hasher);
            venue.capacity.hash(&mut hasher);
            venue.unavailable_dates.hash(&mut hasher);
            if let Some(location) = venue.location {
                location.lat.to_bits().hash(&mut hasher);
                location.lon.to_bits().hash(&mut hasher);
            }
        }
        ScheduleFingerprint(hasher.finish())
    }

    /// Games involving a team, ordered by start time.
    pub fn games_for_team(&self, team_id: &str) -> Vec<&ScheduleSlot> {
        let mut games: Vec<&ScheduleSlot> =
            self.slots.iter().filter(|s| s.involves_team(team_id)).collect();
        games.sort_by_key(|s| s.start());
        games
    }

    /// Apply a set of modifications as one transaction.
    ///
    /// Every modification is checked against the current field value first;
    /// if any check fails nothing is changed.
    pub fn apply_modifications(
        &mut self,
        modifications: &[Modification],
    ) -> Result<(), ScheduleEditError> {
        let mut staged = self.slots.clone();
        for m in modifications {
            let slot = staged
                .iter_mut()
                .find(|s| s.game_id == m.game_id)
                .ok_or_else(|| ScheduleEditError::UnknownGame(m.game_id.clone()))?;
            let actual = slot.field_value(m.field);
            if actual != m.old_value {
                return Err(ScheduleEditError::StaleModification {
                    game_id: m.game_id.clone(),
                    field: m.field,
                    expected: m.old_value.clone(),
                    actual,
                });
            }
            slot.set_field(m.field, &m.new_value)?;
        }
        self.slots = staged;
        self.version += 1;
        Ok(())
    }
}

/// Outcome category of a constraint evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Satisfied,
    Violated,
    Partial,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: String,
    pub description: String,
    pub game_ids: Vec<String>,
    /// 0.0 (cosmetic) to 1.0 (blocking).
    pub severity: f64,
}

impl Violation {
    pub fn new(kind: impl Into<String>, description: impl Into<String>, game_ids: Vec<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            game_ids,
            severity: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: String,
    pub description: String,
    pub game_ids: Vec<String>,
    pub priority: SuggestionPriority,
}

impl Suggestion {
    pub fn new(
        kind: impl Into<String>,
        description: impl Into<String>,
        game_ids: Vec<String>,
        priority: SuggestionPriority,
    ) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            game_ids,
            priority,
        }
    }
}

/// Result of evaluating one constraint.
///
/// `status` is authoritative; `score` is the continuous signal in [0, 1].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintResult {
    pub status: ResultStatus,
    pub score: f64,
    pub violations: Vec<Violation>,
    pub suggestions: Vec<Suggestion>,
}

impl ConstraintResult {
    pub fn satisfied() -> Self {
        Self {
            status: ResultStatus::Satisfied,
            score: 1.0,
            violations: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn violated(score: f64, violations: Vec<Violation>) -> Self {
        Self {
            status: ResultStatus::Violated,
            score: score.clamp(0.0, 1.0),
            violations,
            suggestions: Vec::new(),
        }
    }

    pub fn partial(score: f64) -> Self {
        Self {
            status: ResultStatus::Partial,
            score: score.clamp(0.0, 1.0),
            violations: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.status == ResultStatus::Satisfied
    }

    /// Fold per-slot results into one per-constraint result.
    ///
    /// Violated dominates partial, partial dominates satisfied; the score is
    /// the mean slot score. No slots means trivially satisfied.
    pub fn combine<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a ConstraintResult>,
    {
        let mut combined = Self::satisfied();
        let mut total = 0.0;
        let mut count = 0usize;
        for r in results {
            combined.status = match (combined.status, r.status) {
                (ResultStatus::Violated, _) | (_, ResultStatus::Violated) => ResultStatus::Violated,
                (ResultStatus::Partial, _) | (_, ResultStatus::Partial) => ResultStatus::Partial,
                _ => ResultStatus::Satisfied,
            };
            total += r.score;
            count += 1;
            combined.violations.extend(r.violations.iter().cloned());
            combined.suggestions.extend(r.suggestions.iter().cloned());
        }
        if count > 0 {
            combined.score = (total / count as f64).clamp(0.0, 1.0);
        }
        combined
    }
}
