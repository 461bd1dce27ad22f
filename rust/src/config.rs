//! Configuration types for evaluation, monitoring and conflict resolution.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while interpreting configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown grouping strategy: {0}")]
    UnknownGroupingStrategy(String),
    #[error("Unknown engine preset: {0}")]
    UnknownPreset(String),
}

/// How the engine partitions constraints into evaluation groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    /// One group per constraint type.
    Type,
    /// Hard, then soft, then preference constraints.
    Hardness,
    /// Dependency waves from the dependency analyzer.
    Dependency,
    /// Dependency waves when they pay off, hardness groups otherwise.
    Smart,
}

impl FromStr for GroupingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "type" => Ok(Self::Type),
            "hardness" => Ok(Self::Hardness),
            "dependency" => Ok(Self::Dependency),
            "smart" => Ok(Self::Smart),
            _ => Err(ConfigError::UnknownGroupingStrategy(s.to_string())),
        }
    }
}

/// Named bundles of engine settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePreset {
    Performance,
    Balanced,
    Accuracy,
}

impl FromStr for EnginePreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "performance" => Ok(Self::Performance),
            "balanced" => Ok(Self::Balanced),
            "accuracy" => Ok(Self::Accuracy),
            _ => Err(ConfigError::UnknownPreset(s.to_string())),
        }
    }
}

/// Constraint cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub max_size: usize,
    /// TTL for entries stored without an explicit TTL.
    pub default_ttl: Duration,
    /// Fraction of entries dropped by `handle_memory_pressure`.
    pub pressure_eviction_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(300),
            pressure_eviction_ratio: 0.25,
        }
    }
}

/// Thresholds checked after every closed evaluation bracket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Alert when a single evaluation takes longer than this.
    pub evaluation_time_ms: f64,
    /// Alert when a constraint's success rate drops below this.
    pub success_rate: f64,
    /// Alert when a constraint's error rate rises above this.
    pub error_rate: f64,
    /// Rate-based alerts need at least this many samples.
    pub min_samples: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            evaluation_time_ms: 1000.0,
            success_rate: 0.8,
            error_rate: 0.2,
            min_samples: 1,
        }
    }
}

/// Performance monitor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub thresholds: AlertThresholds,
    /// Brackets open longer than this are reported as suspected leaks.
    pub leak_grace_period: Duration,
    /// Per-constraint sample history cap (oldest samples dropped first).
    pub max_samples_per_constraint: usize,
    /// Minimum average time for a constraint to count as a bottleneck.
    pub bottleneck_time_ms: f64,
    /// Minimum number of (transitive) dependents for a bottleneck.
    pub bottleneck_min_dependents: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: AlertThresholds::default(),
            leak_grace_period: Duration::from_secs(30),
            max_samples_per_constraint: 1000,
            bottleneck_time_ms: 100.0,
            bottleneck_min_dependents: 2,
        }
    }
}

/// Constraint engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub enable_caching: bool,
    pub enable_parallelization: bool,
    /// Worker threads in the evaluation pool.
    pub max_workers: usize,
    pub grouping_strategy: GroupingStrategy,
    /// Smart grouping picks dependency waves only with at least this many
    /// independent constraints.
    pub min_parallel_constraints: usize,
    /// How long `shutdown` waits for running evaluations.
    pub shutdown_grace: Duration,
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
    /// Verbosity level: 0=silent, 1=summary, 2=detail, 3=debug.
    pub verbosity: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::preset(EnginePreset::Balanced)
    }
}

impl EngineConfig {
    /// Build the settings bundle for a named preset.
    pub fn preset(preset: EnginePreset) -> Self {
        let (enable_caching, enable_parallelization, max_workers, grouping_strategy) = match preset
        {
            EnginePreset::Performance => (
                true,
                true,
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4),
                GroupingStrategy::Smart,
            ),
            EnginePreset::Balanced => (true, true, 4, GroupingStrategy::Smart),
            EnginePreset::Accuracy => (false, false, 1, GroupingStrategy::Dependency),
        };
        Self {
            enable_caching,
            enable_parallelization,
            max_workers,
            grouping_strategy,
            min_parallel_constraints: 4,
            shutdown_grace: Duration::from_secs(5),
            cache: CacheConfig::default(),
            monitor: MonitorConfig::default(),
            verbosity: 0,
        }
    }

    pub fn with_grouping(mut self, strategy: GroupingStrategy) -> Self {
        self.grouping_strategy = strategy;
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enable_caching = enabled;
        self
    }

    pub fn with_parallelization(mut self, enabled: bool, max_workers: usize) -> Self {
        self.enable_parallelization = enabled;
        self.max_workers = max_workers.max(1);
        self
    }
}

/// Settings for the built-in conflict detector and repair search space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum full days between two games of the same team.
    pub min_rest_days: i64,
    /// Travel between consecutive-day games above this distance is a burden.
    pub max_daily_travel_km: f64,
    /// Earliest start time a repair may move a game to.
    pub day_start: NaiveTime,
    /// Latest end time a repair may move a game to.
    pub day_end: NaiveTime,
    /// How many days a date-based repair may move a game.
    pub max_date_shift_days: i64,
    /// Step used when searching alternative start times.
    pub time_shift_step_minutes: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_rest_days: 1,
            max_daily_travel_km: 800.0,
            day_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            day_end: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN),
            max_date_shift_days: 3,
            time_shift_step_minutes: 120,
        }
    }
}

/// Smart conflict resolver settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Resolutions below this feasibility are discarded.
    pub confidence_threshold: f64,
    /// Upper bound on strategies tried per conflict.
    pub max_resolution_attempts: usize,
    /// Record outcomes into the resolution history.
    pub enable_learning: bool,
    /// Accept and apply validated resolutions; otherwise they stay proposed.
    pub auto_apply: bool,
    /// Rolling window size per (conflict type, strategy) pair.
    pub history_window: usize,
    /// Verbosity level: 0=silent, 1=summary, 2=detail, 3=debug.
    pub verbosity: u8,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            max_resolution_attempts: 3,
            enable_learning: true,
            auto_apply: true,
            history_window: 50,
            verbosity: 0,
        }
    }
}
