//! Schedule conflict detection and repair.
//!
//! Detection finds incompatibilities in a schedule, the analyzer ranks the
//! strategies that could fix each one (informed by past outcomes), the
//! generator turns a strategy into concrete modifications, and the resolver
//! validates and applies them in severity order.

mod analyzer;
mod detection;
mod history;
mod resolver;
mod strategies;
mod types;

pub use analyzer::{ConflictAnalysis, ConflictAnalyzer, ConflictPattern, ImpactAssessment, StrategyCandidate};
pub use detection::{ConflictDetector, StandardConflictDetector};
pub use history::ResolutionHistory;
pub use resolver::{RejectedCandidate, ResolutionReport, SkippedConflict, SmartConflictResolver};
pub use strategies::{parse_time, ResolutionGenerator};
pub use types::{
    Conflict, ConflictMetadata, ConflictType, Resolution, ResolutionError, ResolutionImpact,
    ResolutionStatus, ResolutionStrategy, Severity,
};
