//! Smart conflict resolver: prioritise, analyze, generate, validate, apply.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{DetectorConfig, ResolverConfig};
use crate::models::Schedule;
use crate::{log_debug, log_detail, log_summary};

use super::analyzer::ConflictAnalyzer;
use super::detection::{ConflictDetector, StandardConflictDetector};
use super::history::ResolutionHistory;
use super::strategies::ResolutionGenerator;
use super::types::{Conflict, Resolution, ResolutionError, ResolutionStatus, ResolutionStrategy, Severity};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedConflict {
    pub conflict_id: String,
    pub reason: String,
}

/// A candidate that failed validation. Its resolution has status `Rejected`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub resolution: Resolution,
    pub reason: String,
}

/// Outcome of one resolver pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Chosen resolution per conflict id.
    pub resolutions: BTreeMap<String, Resolution>,
    /// Conflict ids in the order they were worked on.
    pub processing_order: Vec<String>,
    pub skipped: Vec<SkippedConflict>,
    /// Every candidate validation turned down, in the order tried.
    pub rejected: Vec<RejectedCandidate>,
}

impl ResolutionReport {
    pub fn accepted(&self) -> impl Iterator<Item = &Resolution> {
        self.resolutions
            .values()
            .filter(|r| r.status == ResolutionStatus::Accepted)
    }
}

pub struct SmartConflictResolver {
    config: ResolverConfig,
    detector: Box<dyn ConflictDetector>,
    analyzer: ConflictAnalyzer,
    generator: ResolutionGenerator,
    history: ResolutionHistory,
}

impl Default for SmartConflictResolver {
    fn default() -> Self {
        Self::with_detector_config(ResolverConfig::default(), DetectorConfig::default())
    }
}

fn critical_ids(conflicts: &[Conflict]) -> FxHashSet<&str> {
    conflicts
        .iter()
        .filter(|c| c.severity == Severity::Critical)
        .map(|c| c.id.as_str())
        .collect()
}

impl SmartConflictResolver {
    /// Resolver using a custom detector for validation.
    pub fn new(config: ResolverConfig, detector: impl ConflictDetector + 'static) -> Self {
        let history = ResolutionHistory::new(config.history_window);
        Self {
            config,
            detector: Box::new(detector),
            analyzer: ConflictAnalyzer::new(),
            generator: ResolutionGenerator::default(),
            history,
        }
    }

    /// Resolver using the standard detector; detection and repair share settings.
    pub fn with_detector_config(config: ResolverConfig, detector_config: DetectorConfig) -> Self {
        let mut resolver = Self::new(config, StandardConflictDetector::new(detector_config.clone()));
        resolver.generator = ResolutionGenerator::new(detector_config);
        resolver
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn history(&self) -> &ResolutionHistory {
        &self.history
    }

    /// Conflicts in the schedule, annotated with how often their type has
    /// been worked on before.
    pub fn detect(&self, schedule: &Schedule) -> Vec<Conflict> {
        let mut conflicts = self.detector.detect(schedule);
        for c in &mut conflicts {
            c.metadata.historical_frequency = self.history.conflict_frequency(&c.conflict_type) as f64;
        }
        conflicts
    }

    /// Detect conflicts in the schedule and resolve them.
    pub fn resolve_detected(&mut self, schedule: &mut Schedule) -> ResolutionReport {
        let conflicts = self.detect(schedule);
        self.resolve_conflicts(schedule, &conflicts)
    }

    /// Work through conflicts from most to least severe, higher cascade risk
    /// first within a severity. Accepted resolutions are applied to the
    /// schedule immediately when `auto_apply` is set.
    pub fn resolve_conflicts(&mut self, schedule: &mut Schedule, conflicts: &[Conflict]) -> ResolutionReport {
        let verbosity = self.config.verbosity;
        let mut ordered: Vec<&Conflict> = conflicts.iter().collect();
        ordered.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.metadata.cascade_risk.total_cmp(&a.metadata.cascade_risk))
        });

        let initially_detected: FxHashSet<String> =
            self.detector.detect(schedule).into_iter().map(|c| c.id).collect();
        let mut changed = false;
        let mut report = ResolutionReport::default();

        for conflict in ordered {
            report.processing_order.push(conflict.id.clone());

            if changed && initially_detected.contains(&conflict.id) {
                let still_present = self.detector.detect(schedule).iter().any(|c| c.id == conflict.id);
                if !still_present {
                    log_detail!(verbosity, "{}: already resolved by an earlier change", conflict.id);
                    report.skipped.push(SkippedConflict {
                        conflict_id: conflict.id.clone(),
                        reason: "already resolved".to_string(),
                    });
                    continue;
                }
            }

            match self.resolve_one(schedule, conflict, &mut report.rejected) {
                Ok(Some(resolution)) => {
                    if resolution.status == ResolutionStatus::Accepted {
                        changed = true;
                    }
                    report.resolutions.insert(conflict.id.clone(), resolution);
                }
                Ok(None) => report.skipped.push(SkippedConflict {
                    conflict_id: conflict.id.clone(),
                    reason: "no viable resolution".to_string(),
                }),
                Err(e) => {
                    log_detail!(verbosity, "{}: skipped: {}", conflict.id, e);
                    report.skipped.push(SkippedConflict {
                        conflict_id: conflict.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        log_summary!(
            verbosity,
            "Resolved {}/{} conflicts ({} skipped, {} candidates rejected)",
            report.resolutions.len(),
            conflicts.len(),
            report.skipped.len(),
            report.rejected.len()
        );
        report
    }

    /// Try candidate strategies for one conflict until one validates.
    ///
    /// Each strategy offers up to `max_resolution_attempts` placements,
    /// nearest first. Placements that fail validation are recorded in
    /// `rejected` and count as failures for learning.
    fn resolve_one(
        &mut self,
        schedule: &mut Schedule,
        conflict: &Conflict,
        rejected: &mut Vec<RejectedCandidate>,
    ) -> Result<Option<Resolution>, ResolutionError> {
        let verbosity = self.config.verbosity;
        let analysis = self.analyzer.analyze(conflict, schedule, &self.history)?;
        log_debug!(
            verbosity,
            "{}: {:?}, {} candidate(s)",
            conflict.id,
            analysis.pattern,
            analysis.candidates.len()
        );

        let limit = self.config.max_resolution_attempts;
        let attempts = limit.min(analysis.candidates.len());
        for candidate in analysis.candidates.iter().take(attempts) {
            let strategy = candidate.strategy;
            let alternatives =
                match self.generator.generate_alternatives(strategy, conflict, schedule, limit) {
                    Ok(alternatives) => alternatives,
                    Err(e) => {
                        log_detail!(verbosity, "{}: {}", conflict.id, e);
                        continue;
                    }
                };
            if alternatives.is_empty() {
                log_detail!(verbosity, "{}: {} found no placement", conflict.id, strategy);
                continue;
            }

            for mut resolution in alternatives {
                resolution.recommendation_score =
                    0.5 * resolution.feasibility + 0.5 * candidate.score;

                if resolution.feasibility < self.config.confidence_threshold {
                    log_detail!(
                        verbosity,
                        "{}: {} below threshold ({:.2} < {:.2})",
                        conflict.id,
                        strategy,
                        resolution.feasibility,
                        self.config.confidence_threshold
                    );
                    continue;
                }

                if strategy == ResolutionStrategy::ManualOverride {
                    return Ok(Some(resolution));
                }

                if let Err(reason) = self.validate(schedule, conflict, &resolution) {
                    log_detail!(
                        verbosity,
                        "{}: {} rejected: {}",
                        conflict.id,
                        resolution.rationale,
                        reason
                    );
                    self.learn(conflict, strategy, false);
                    resolution.status = ResolutionStatus::Rejected;
                    rejected.push(RejectedCandidate { resolution, reason });
                    continue;
                }

                if self.config.auto_apply {
                    schedule.apply_modifications(&resolution.modifications)?;
                    resolution.status = ResolutionStatus::Accepted;
                }
                self.learn(conflict, strategy, true);
                return Ok(Some(resolution));
            }
        }
        Ok(None)
    }

    /// Apply to a copy and re-detect. Rejects resolutions that introduce a
    /// critical conflict or leave their own conflict in place.
    fn validate(&self, schedule: &Schedule, conflict: &Conflict, resolution: &Resolution) -> Result<(), String> {
        let before = self.detector.detect(schedule);
        let mut trial = schedule.clone();
        trial
            .apply_modifications(&resolution.modifications)
            .map_err(|e| e.to_string())?;
        let after = self.detector.detect(&trial);

        let existing = critical_ids(&before);
        if let Some(new) = critical_ids(&after).into_iter().find(|id| !existing.contains(id)) {
            return Err(format!("introduces critical conflict {}", new));
        }
        if after.iter().any(|c| c.id == conflict.id) {
            return Err("conflict persists".to_string());
        }
        Ok(())
    }

    fn learn(&mut self, conflict: &Conflict, strategy: ResolutionStrategy, success: bool) {
        if self.config.enable_learning {
            self.history.record(&conflict.conflict_type, strategy, success);
        }
    }

    /// Apply an accepted resolution. Returns whether the schedule changed.
    pub fn apply_resolution(&self, schedule: &mut Schedule, resolution: &Resolution) -> Result<bool, ResolutionError> {
        if resolution.status != ResolutionStatus::Accepted {
            return Ok(false);
        }
        schedule.apply_modifications(&resolution.modifications)?;
        Ok(true)
    }
}
