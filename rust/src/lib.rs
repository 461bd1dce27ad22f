//! Constraint evaluation and schedule repair for sports leagues.
//!
//! The [`engine::ConstraintEngine`] evaluates a set of constraints against a
//! schedule (cached, incremental, in dependency-ordered parallel waves) and
//! the [`conflict::SmartConflictResolver`] detects and repairs schedule
//! conflicts.

pub mod cache;
pub mod config;
pub mod conflict;
pub mod dependency;
pub mod engine;
mod interner;
pub mod logging;
pub mod models;
pub mod monitor;

#[cfg(feature = "python")]
mod python;

pub use cache::{CacheKey, CacheStats, ConstraintCache};
pub use config::{
    AlertThresholds, CacheConfig, ConfigError, DetectorConfig, EngineConfig, EnginePreset,
    GroupingStrategy, MonitorConfig, ResolverConfig,
};
pub use conflict::{
    Conflict, ConflictDetector, ConflictType, Resolution, ResolutionError, ResolutionReport,
    ResolutionStrategy, Severity, SmartConflictResolver, StandardConflictDetector,
};
pub use dependency::{DependencyAnalyzer, DependencyError, DependencyGraph};
pub use engine::{ConstraintEngine, EngineError, EvaluationContext, EvaluationResult};
pub use models::{
    evaluator_fn, ConstraintEvaluator, ConstraintResult, ConstraintScope, ConstraintType,
    EvaluationError, Hardness, Schedule, ScheduleSlot, UnifiedConstraint,
};
pub use monitor::{PerformanceMonitor, PerformanceReport};
