//! Constraint engine: plans waves, evaluates them on the worker pool with
//! cache lookups, and aggregates the results into one schedule score.

mod aggregate;
mod grouping;
mod parallel;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::cache::{CacheStats, ConstraintCache};
use crate::config::{EngineConfig, EnginePreset, GroupingStrategy};
use crate::dependency::{DependencyAnalyzer, DependencyError};
use crate::models::{
    ConstraintResult, Hardness, Schedule, ScheduleSlot, Suggestion, UnifiedConstraint,
    Violation,
};
use crate::monitor::{OverallStats, PerformanceMonitor, RunSummary};
use crate::{log_debug, log_detail, log_summary};

pub use parallel::{ParallelEvaluator, RunSession};

/// Failures of the evaluation substrate itself. Single-constraint failures
/// are reported per outcome instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error("Worker pool failure: {0}")]
    WorkerPool(String),
    #[error("Engine is shut down")]
    ShutDown,
    #[error("Shutdown grace period elapsed with {in_flight} evaluation(s) still running")]
    ShutdownTimeout { in_flight: usize },
}

/// Input of one `evaluate` call.
#[derive(Clone, Copy, Debug)]
pub struct EvaluationContext<'a> {
    pub schedule: &'a Schedule,
    pub constraints: &'a [UnifiedConstraint],
    /// Teams or venues changed since the last run. When non-empty, only
    /// constraints whose scope intersects it are evaluated.
    pub modified_entities: Option<&'a FxHashSet<String>>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(schedule: &'a Schedule, constraints: &'a [UnifiedConstraint]) -> Self {
        Self {
            schedule,
            constraints,
            modified_entities: None,
        }
    }

    pub fn with_modified_entities(mut self, entities: &'a FxHashSet<String>) -> Self {
        self.modified_entities = Some(entities);
        self
    }
}

/// What happened to one constraint during a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintOutcome {
    pub constraint_id: String,
    pub hardness: Hardness,
    pub weight: f64,
    /// Combined result over all applicable slots; `None` when evaluation failed.
    pub result: Option<ConstraintResult>,
    pub error: Option<String>,
    pub from_cache_slots: usize,
    pub evaluated_slots: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub duration: Duration,
    pub constraints_total: usize,
    pub constraints_evaluated: usize,
    pub incremental: bool,
    pub grouping_strategy: GroupingStrategy,
    pub waves: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub errors: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub overall_score: f64,
    /// False when any hard constraint was violated or failed to evaluate.
    pub hard_constraints_satisfied: bool,
    /// One entry per evaluated constraint, in input order.
    pub constraint_results: Vec<ConstraintOutcome>,
    pub violations: Vec<Violation>,
    /// Deduplicated, highest priority first.
    pub suggestions: Vec<Suggestion>,
    pub metrics: EvaluationMetrics,
}

impl EvaluationResult {
    pub fn has_errors(&self) -> bool {
        self.constraint_results.iter().any(|o| o.error.is_some())
    }

    pub fn outcome(&self, constraint_id: &str) -> Option<&ConstraintOutcome> {
        self.constraint_results
            .iter()
            .find(|o| o.constraint_id == constraint_id)
    }
}

/// Cache misses of one constraint, evaluated by one worker.
struct ConstraintTask<'a> {
    constraint: &'a UnifiedConstraint,
    slots: Vec<&'a ScheduleSlot>,
}

struct TaskOutput {
    results: Vec<ConstraintResult>,
    elapsed: Duration,
}

/// Per-constraint bookkeeping while a run is in progress.
struct Pending<'a> {
    slots: Vec<&'a ScheduleSlot>,
    /// Per applicable slot; filled from the cache first, then by workers.
    results: Vec<Option<ConstraintResult>>,
    from_cache: usize,
}

pub struct ConstraintEngine {
    config: EngineConfig,
    cache: ConstraintCache,
    monitor: PerformanceMonitor,
    evaluator: ParallelEvaluator,
}

impl ConstraintEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let evaluator = ParallelEvaluator::new(config.max_workers, config.enable_parallelization)?;
        Ok(Self {
            cache: ConstraintCache::new(config.cache.clone()),
            monitor: PerformanceMonitor::new(config.monitor.clone()),
            evaluator,
            config,
        })
    }

    pub fn with_preset(preset: EnginePreset) -> Result<Self, EngineError> {
        Self::new(EngineConfig::preset(preset))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn cache(&self) -> &ConstraintCache {
        &self.cache
    }

    /// Evaluate a constraint set against a schedule.
    ///
    /// Errors of individual constraints are contained in their outcome and
    /// recorded with the monitor. Only failures of the worker pool itself
    /// abort the run.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<EvaluationResult, EngineError> {
        let _session = self.evaluator.begin_session()?;
        let started = Instant::now();
        let verbosity = self.config.verbosity;
        let fingerprint = ctx.schedule.fingerprint();

        let incremental = ctx.modified_entities.is_some_and(|e| !e.is_empty());
        let working: Vec<&UnifiedConstraint> = match ctx.modified_entities {
            Some(entities) if !entities.is_empty() => ctx
                .constraints
                .iter()
                .filter(|c| c.scope.intersects(entities))
                .collect(),
            _ => ctx.constraints.iter().collect(),
        };

        let plan = grouping::plan_waves(
            &working,
            self.config.grouping_strategy,
            self.config.enable_parallelization,
            self.config.min_parallel_constraints,
        );
        for cycle in &plan.cycles {
            log_detail!(
                verbosity,
                "Dependency cycle {} ignored for ordering",
                cycle.join(" -> ")
            );
        }
        log_detail!(
            verbosity,
            "Planned {} constraints into {} waves ({:?} grouping)",
            working.len(),
            plan.waves.len(),
            plan.strategy
        );

        for c in &working {
            self.monitor
                .record_dependencies(&c.id, c.dependencies.iter().cloned());
        }

        let mut pending: Vec<Pending<'_>> = working
            .iter()
            .map(|c| {
                let slots: Vec<&ScheduleSlot> =
                    ctx.schedule.slots.iter().filter(|s| c.applies_to(s)).collect();
                Pending {
                    results: vec![None; slots.len()],
                    slots,
                    from_cache: 0,
                }
            })
            .collect();
        let mut errors: Vec<Option<String>> = vec![None; working.len()];
        let mut cache_hits = 0;
        let mut cache_misses = 0;

        for (wave_no, wave) in plan.waves.iter().enumerate() {
            let mut tasks: Vec<ConstraintTask<'_>> = Vec::new();
            let mut task_owner: Vec<usize> = Vec::new();

            for &i in wave {
                let constraint = working[i];
                let entry = &mut pending[i];
                if self.config.enable_caching {
                    let pairs: Vec<(&UnifiedConstraint, &ScheduleSlot)> =
                        entry.slots.iter().map(|&s| (constraint, s)).collect();
                    let hits = self.cache.get_multiple(fingerprint, &pairs);
                    for (slot_no, hit) in hits.into_iter().enumerate() {
                        if hit.is_some() {
                            entry.results[slot_no] = hit;
                            entry.from_cache += 1;
                        }
                    }
                    cache_hits += entry.from_cache;
                    cache_misses += entry.slots.len() - entry.from_cache;
                }
                let misses: Vec<&ScheduleSlot> = entry
                    .slots
                    .iter()
                    .zip(&entry.results)
                    .filter(|(_, r)| r.is_none())
                    .map(|(&s, _)| s)
                    .collect();
                if misses.is_empty() {
                    log_debug!(verbosity, "{}: all {} slots cached", constraint.id, entry.slots.len());
                    continue;
                }
                tasks.push(ConstraintTask {
                    constraint,
                    slots: misses,
                });
                task_owner.push(i);
            }

            log_detail!(
                verbosity,
                "Wave {}: {} constraints, {} to evaluate",
                wave_no,
                wave.len(),
                tasks.len()
            );
            let schedule = ctx.schedule;
            let outputs = self.evaluator.run_wave(&tasks, |task| {
                let start = Instant::now();
                let mut results = Vec::with_capacity(task.slots.len());
                for slot in &task.slots {
                    results.push(task.constraint.evaluate(schedule, slot)?);
                }
                Ok(TaskOutput {
                    results,
                    elapsed: start.elapsed(),
                })
            })?;

            // Merge sequentially: cache writes and monitor records happen here only.
            for ((task, &i), output) in tasks.iter().zip(&task_owner).zip(outputs) {
                let constraint = task.constraint;
                match output {
                    Ok(output) => {
                        let fresh = ConstraintResult::combine(&output.results);
                        self.monitor
                            .record_evaluation(&constraint.id, output.elapsed, &fresh);
                        let entry = &mut pending[i];
                        let mut fresh_results = output.results.into_iter();
                        for (slot_no, slot) in entry.slots.iter().enumerate() {
                            if entry.results[slot_no].is_some() {
                                continue;
                            }
                            let Some(result) = fresh_results.next() else { break };
                            if self.config.enable_caching {
                                self.cache.set(fingerprint, constraint, slot, result.clone());
                            }
                            entry.results[slot_no] = Some(result);
                        }
                    }
                    Err(mut e) => {
                        if e.constraint_id.is_empty() {
                            e.constraint_id = constraint.id.clone();
                        }
                        log_detail!(verbosity, "{}", e);
                        self.monitor.record_error(&constraint.id, &e.message);
                        errors[i] = Some(e.to_string());
                    }
                }
            }
        }

        let constraint_results: Vec<ConstraintOutcome> = working
            .iter()
            .zip(pending)
            .zip(errors)
            .map(|((c, entry), error)| {
                let evaluated_slots = entry.slots.len() - entry.from_cache;
                let result = match error {
                    Some(_) => None,
                    None => Some(ConstraintResult::combine(entry.results.iter().flatten())),
                };
                ConstraintOutcome {
                    constraint_id: c.id.clone(),
                    hardness: c.hardness,
                    weight: c.weight,
                    result,
                    error,
                    from_cache_slots: entry.from_cache,
                    evaluated_slots,
                }
            })
            .collect();

        let (overall_score, hard_constraints_satisfied) =
            aggregate::overall_score(&constraint_results);
        let violations: Vec<Violation> = constraint_results
            .iter()
            .filter_map(|o| o.result.as_ref())
            .flat_map(|r| r.violations.iter().cloned())
            .collect();
        let suggestions = aggregate::merge_suggestions(
            constraint_results
                .iter()
                .filter_map(|o| o.result.as_ref())
                .flat_map(|r| r.suggestions.iter()),
        );
        let error_count = constraint_results.iter().filter(|o| o.error.is_some()).count();

        let metrics = EvaluationMetrics {
            duration: started.elapsed(),
            constraints_total: ctx.constraints.len(),
            constraints_evaluated: working.len(),
            incremental,
            grouping_strategy: plan.strategy,
            waves: plan.waves.len(),
            cache_hits,
            cache_misses,
            errors: error_count,
        };
        self.monitor.record_run(RunSummary {
            duration: metrics.duration,
            constraints_evaluated: metrics.constraints_evaluated,
            cache_hits,
            cache_misses,
            errors: error_count,
            overall_score,
        });
        log_summary!(
            verbosity,
            "Evaluated {} of {} constraints in {} waves ({:.1}ms): score {:.3}, hard ok: {}, {} cache hits, {} errors",
            metrics.constraints_evaluated,
            metrics.constraints_total,
            metrics.waves,
            metrics.duration.as_secs_f64() * 1000.0,
            overall_score,
            hard_constraints_satisfied,
            cache_hits,
            error_count
        );

        Ok(EvaluationResult {
            overall_score,
            hard_constraints_satisfied,
            constraint_results,
            violations,
            suggestions,
            metrics,
        })
    }

    /// Pre-populate the cache for every applicable constraint/slot pair.
    ///
    /// Failing evaluations are skipped. Returns the number of entries stored.
    pub fn warm_cache(&self, schedule: &Schedule, constraints: &[UnifiedConstraint]) -> usize {
        if !self.config.enable_caching {
            return 0;
        }
        let _session = match self.evaluator.begin_session() {
            Ok(session) => session,
            Err(e) => {
                log_summary!(self.config.verbosity, "Cache warm-up skipped: {}", e);
                return 0;
            }
        };
        let pairs: Vec<(&UnifiedConstraint, &ScheduleSlot)> = constraints
            .iter()
            .flat_map(|c| {
                schedule
                    .slots
                    .iter()
                    .filter(move |s| c.applies_to(s))
                    .map(move |s| (c, s))
            })
            .collect();

        let outputs = match self
            .evaluator
            .run_wave(&pairs, |(c, s)| c.evaluate(schedule, s))
        {
            Ok(outputs) => outputs,
            Err(e) => {
                log_summary!(self.config.verbosity, "Cache warm-up skipped: {}", e);
                return 0;
            }
        };

        let mut warmed = Vec::with_capacity(pairs.len());
        for (&(c, s), output) in pairs.iter().zip(outputs) {
            match output {
                Ok(result) => warmed.push((c, s, result)),
                Err(e) => {
                    log_debug!(self.config.verbosity, "Warm-up of {} failed: {}", c.id, e.message);
                    self.monitor.record_error(&c.id, &e.message);
                }
            }
        }
        let stored = self.cache.warm_up(schedule.fingerprint(), warmed);
        log_detail!(self.config.verbosity, "Warmed {} cache entries", stored);
        stored
    }

    /// Dependency waves of a full constraint set, for operator tooling.
    ///
    /// Unlike `evaluate`, which drops dependency ordering on cycles, this
    /// fails on a circular dependency.
    pub fn execution_groups(
        &self,
        constraints: &[UnifiedConstraint],
    ) -> Result<Vec<Vec<String>>, EngineError> {
        Ok(DependencyAnalyzer::new(constraints).get_parallel_execution_groups()?)
    }

    /// Drop cached results of one constraint. Returns the number of entries removed.
    pub fn invalidate_constraint(&self, constraint_id: &str) -> usize {
        self.cache.invalidate(constraint_id)
    }

    pub fn get_performance_stats(&self) -> OverallStats {
        self.monitor.get_overall_stats()
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Release the worker pool, clear the cache and reset the monitor.
    ///
    /// Waits up to the configured grace period for running evaluations. On
    /// timeout the cache and monitor are left untouched, since a straggling
    /// run may still write to them; calling `shutdown` again once it has
    /// finished completes the teardown.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        if let Err(e) = self.evaluator.shutdown(self.config.shutdown_grace) {
            log_summary!(self.config.verbosity, "Engine shutdown incomplete: {}", e);
            return Err(e);
        }
        self.cache.clear();
        self.monitor.reset();
        log_summary!(self.config.verbosity, "Engine shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        evaluator_fn, ConstraintScope, ConstraintType, EvaluationError, FieldValue, Modification,
        SlotField, SuggestionPriority,
    };
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn make_slot(game_id: &str, day: u32, venue: &str, teams: &[&str]) -> ScheduleSlot {
        ScheduleSlot::new(
            game_id,
            NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            venue,
            teams.iter().map(|t| t.to_string()).collect(),
        )
    }

    fn schedule() -> Schedule {
        Schedule::new("s1").with_slots(vec![
            make_slot("g1", 1, "arena", &["duke", "unc"]),
            make_slot("g2", 2, "dome", &["kansas", "baylor"]),
        ])
    }

    fn constant(id: &str, hardness: Hardness, result: ConstraintResult) -> UnifiedConstraint {
        UnifiedConstraint::new(
            id,
            id,
            ConstraintType::Temporal,
            hardness,
            evaluator_fn(move |_, _| Ok(result.clone())),
        )
    }

    fn counting(id: &str, calls: Arc<AtomicUsize>) -> UnifiedConstraint {
        UnifiedConstraint::new(
            id,
            id,
            ConstraintType::Temporal,
            Hardness::Soft,
            evaluator_fn(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(ConstraintResult::satisfied())
            }),
        )
    }

    fn engine(config: EngineConfig) -> ConstraintEngine {
        ConstraintEngine::new(config).unwrap()
    }

    #[test]
    fn test_hard_violation_vetoes_score() {
        let s = schedule();
        let constraints = vec![
            constant(
                "hard",
                Hardness::Hard,
                ConstraintResult::violated(0.8, vec![Violation::new("x", "bad", vec![])]),
            ),
            constant("soft", Hardness::Soft, ConstraintResult::satisfied()),
        ];
        let engine = engine(EngineConfig::default());
        let result = engine.evaluate(&EvaluationContext::new(&s, &constraints)).unwrap();

        assert_eq!(result.overall_score, 0.0);
        assert!(!result.hard_constraints_satisfied);
        // one violation per slot
        assert_eq!(result.violations.len(), 2);
        assert_eq!(result.constraint_results.len(), 2);
        assert_eq!(result.constraint_results[0].constraint_id, "hard");
    }

    #[test]
    fn test_weighted_soft_score() {
        let s = schedule();
        let constraints = vec![
            constant("a", Hardness::Soft, ConstraintResult::partial(0.5)).with_weight(3.0),
            constant("b", Hardness::Soft, ConstraintResult::satisfied()),
        ];
        let engine = engine(EngineConfig::preset(EnginePreset::Accuracy));
        let result = engine.evaluate(&EvaluationContext::new(&s, &constraints)).unwrap();

        assert!(result.hard_constraints_satisfied);
        assert!((result.overall_score - 2.5 / 4.0).abs() < 1e-9);
        assert_eq!(result.metrics.grouping_strategy, GroupingStrategy::Dependency);
    }

    #[test]
    fn test_cache_avoids_reevaluation() {
        let s = schedule();
        let calls = Arc::new(AtomicUsize::new(0));
        let constraints = vec![counting("c", Arc::clone(&calls))];
        let engine = engine(EngineConfig::default());
        let ctx = EvaluationContext::new(&s, &constraints);

        let first = engine.evaluate(&ctx).unwrap();
        assert_eq!(first.metrics.cache_misses, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let second = engine.evaluate(&ctx).unwrap();
        assert_eq!(second.metrics.cache_hits, 2);
        assert_eq!(second.constraint_results[0].from_cache_slots, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(engine.invalidate_constraint("c"), 2);
        engine.evaluate(&ctx).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_cached_results_follow_edits_to_other_games() {
        // Hard: a team may not play on consecutive days
        let rest = UnifiedConstraint::new(
            "rest",
            "rest days",
            ConstraintType::Temporal,
            Hardness::Hard,
            evaluator_fn(|schedule: &Schedule, slot: &ScheduleSlot| {
                let back_to_back = schedule.slots.iter().any(|other| {
                    other.game_id != slot.game_id
                        && other.date == slot.date.succ_opt().unwrap_or(slot.date)
                        && other.teams.iter().any(|t| slot.involves_team(t))
                });
                Ok(if back_to_back {
                    ConstraintResult::violated(
                        0.0,
                        vec![Violation::new("rest", "back to back", vec![slot.game_id.clone()])],
                    )
                } else {
                    ConstraintResult::satisfied()
                })
            }),
        );
        let constraints = vec![rest];
        let mut s = Schedule::new("s1").with_slots(vec![
            make_slot("g1", 1, "arena", &["x", "y"]),
            make_slot("g2", 2, "dome", &["x", "z"]),
        ]);
        let engine = engine(EngineConfig::default());

        let before = engine.evaluate(&EvaluationContext::new(&s, &constraints)).unwrap();
        assert!(!before.hard_constraints_satisfied);

        // Only g2 moves; g1's own slot is unchanged
        s.apply_modifications(&[Modification {
            game_id: "g2".to_string(),
            field: SlotField::Date,
            old_value: FieldValue::Date(NaiveDate::from_ymd_opt(2025, 3, 2).unwrap()),
            new_value: FieldValue::Date(NaiveDate::from_ymd_opt(2025, 3, 20).unwrap()),
        }])
        .unwrap();

        let after = engine.evaluate(&EvaluationContext::new(&s, &constraints)).unwrap();
        assert!(after.hard_constraints_satisfied);
        assert_eq!(after.overall_score, 1.0);
        assert!(after.violations.is_empty());
        assert_eq!(after.metrics.cache_hits, 0);
    }

    #[test]
    fn test_caching_disabled() {
        let s = schedule();
        let calls = Arc::new(AtomicUsize::new(0));
        let constraints = vec![counting("c", Arc::clone(&calls))];
        let engine = engine(EngineConfig::default().with_caching(false));
        let ctx = EvaluationContext::new(&s, &constraints);
        engine.evaluate(&ctx).unwrap();
        engine.evaluate(&ctx).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(engine.get_cache_stats().size, 0);
    }

    #[test]
    fn test_incremental_mode_filters_by_scope() {
        let s = schedule();
        let constraints = vec![
            constant("duke-only", Hardness::Soft, ConstraintResult::satisfied()).with_scope(
                ConstraintScope {
                    teams: vec!["duke".to_string()],
                    venues: vec![],
                },
            ),
            constant("dome-only", Hardness::Soft, ConstraintResult::satisfied()).with_scope(
                ConstraintScope {
                    teams: vec![],
                    venues: vec!["dome".to_string()],
                },
            ),
            constant("global", Hardness::Soft, ConstraintResult::satisfied()),
        ];
        let modified: FxHashSet<String> = ["duke".to_string()].into_iter().collect();
        let engine = engine(EngineConfig::default());
        let result = engine
            .evaluate(&EvaluationContext::new(&s, &constraints).with_modified_entities(&modified))
            .unwrap();

        let ids: Vec<&str> = result
            .constraint_results
            .iter()
            .map(|o| o.constraint_id.as_str())
            .collect();
        assert_eq!(ids, vec!["duke-only", "global"]);
        assert!(result.metrics.incremental);
        // duke plays only in g1
        assert_eq!(result.constraint_results[0].evaluated_slots, 1);

        let empty = FxHashSet::default();
        let full = engine
            .evaluate(&EvaluationContext::new(&s, &constraints).with_modified_entities(&empty))
            .unwrap();
        assert_eq!(full.constraint_results.len(), 3);
        assert!(!full.metrics.incremental);
    }

    #[test]
    fn test_evaluation_error_is_contained() {
        let s = schedule();
        let constraints = vec![
            UnifiedConstraint::new(
                "broken",
                "broken",
                ConstraintType::Compliance,
                Hardness::Hard,
                evaluator_fn(|_, _| Err(EvaluationError::new("", "lookup failed"))),
            ),
            UnifiedConstraint::new(
                "panics",
                "panics",
                ConstraintType::Compliance,
                Hardness::Soft,
                evaluator_fn(|_, _| -> Result<ConstraintResult, EvaluationError> {
                    panic!("unexpected state")
                }),
            ),
            constant("fine", Hardness::Soft, ConstraintResult::partial(0.6)),
        ];
        let engine = engine(EngineConfig::default());
        let result = engine.evaluate(&EvaluationContext::new(&s, &constraints)).unwrap();

        assert!(result.has_errors());
        // A hard constraint that cannot be checked is not known to hold
        assert!(!result.hard_constraints_satisfied);
        assert_eq!(result.metrics.errors, 2);
        let broken = result.outcome("broken").unwrap();
        assert!(broken.result.is_none());
        assert!(broken.error.as_ref().unwrap().contains("lookup failed"));
        assert!(result.outcome("panics").unwrap().error.as_ref().unwrap().contains("panicked"));
        assert!((result.overall_score - 0.6).abs() < 1e-9);

        assert_eq!(engine.monitor().get_constraint_stats("broken").unwrap().error_count, 1);
        // Failed evaluations are never cached
        assert_eq!(engine.get_cache_stats().size, 2);
    }

    #[test]
    fn test_suggestions_deduplicated() {
        let s = schedule();
        let suggestion = Suggestion::new("rest", "Add a rest day", vec!["g1".to_string()], SuggestionPriority::Low);
        let constraints = vec![constant(
            "rest",
            Hardness::Soft,
            ConstraintResult::partial(0.5).with_suggestions(vec![suggestion]),
        )];
        let engine = engine(EngineConfig::default());
        let result = engine.evaluate(&EvaluationContext::new(&s, &constraints)).unwrap();
        // Both slots produce the same suggestion
        assert_eq!(result.suggestions.len(), 1);
    }

    #[test]
    fn test_dependency_waves_run_in_order() {
        let s = schedule();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let make = |id: &str, deps: &[&str]| {
            let order = Arc::clone(&order);
            let name = id.to_string();
            UnifiedConstraint::new(
                id,
                id,
                ConstraintType::Logical,
                Hardness::Soft,
                evaluator_fn(move |_, _| {
                    order.lock().unwrap().push(name.clone());
                    Ok(ConstraintResult::satisfied())
                }),
            )
            .with_dependencies(deps.iter().copied())
        };
        let constraints = vec![make("late", &["early"]), make("early", &[])];
        let engine = engine(EngineConfig::default().with_grouping(GroupingStrategy::Dependency));
        let result = engine.evaluate(&EvaluationContext::new(&s, &constraints)).unwrap();

        assert_eq!(result.metrics.waves, 2);
        let order = order.lock().unwrap();
        assert_eq!(*order, vec!["early", "early", "late", "late"]);
    }

    #[test]
    fn test_warm_cache_skips_failures() {
        let s = schedule();
        let constraints = vec![
            constant("ok", Hardness::Soft, ConstraintResult::satisfied()),
            UnifiedConstraint::new(
                "broken",
                "broken",
                ConstraintType::Spatial,
                Hardness::Soft,
                evaluator_fn(|_, _| Err(EvaluationError::new("", "no data"))),
            ),
        ];
        let engine = engine(EngineConfig::default());
        assert_eq!(engine.warm_cache(&s, &constraints), 2);
        assert_eq!(engine.get_cache_stats().size, 2);

        let result = engine.evaluate(&EvaluationContext::new(&s, &constraints)).unwrap();
        assert_eq!(result.outcome("ok").unwrap().from_cache_slots, 2);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let s = schedule();
        let constraints = vec![constant("c", Hardness::Soft, ConstraintResult::satisfied())];
        let engine = engine(EngineConfig::default());
        engine.evaluate(&EvaluationContext::new(&s, &constraints)).unwrap();
        assert!(engine.get_performance_stats().total_evaluations > 0);

        engine.shutdown().unwrap();
        assert_eq!(engine.get_cache_stats().size, 0);
        assert_eq!(engine.get_performance_stats().total_evaluations, 0);
        assert!(matches!(
            engine.evaluate(&EvaluationContext::new(&s, &constraints)),
            Err(EngineError::ShutDown)
        ));
    }

    #[test]
    fn test_shutdown_waits_for_running_evaluation() {
        let s = schedule();
        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let slow = {
            let started = Arc::clone(&started);
            UnifiedConstraint::new(
                "slow",
                "slow",
                ConstraintType::Performance,
                Hardness::Soft,
                evaluator_fn(move |_, _| {
                    started.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(ConstraintResult::satisfied())
                }),
            )
        };
        let constraints = vec![slow];
        let engine = engine(EngineConfig {
            shutdown_grace: Duration::from_millis(10),
            ..EngineConfig::default()
        });

        std::thread::scope(|scope| {
            let run = scope.spawn(|| engine.evaluate(&EvaluationContext::new(&s, &constraints)));
            while !started.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }

            assert!(matches!(engine.shutdown(), Err(EngineError::ShutdownTimeout { .. })));
            // The interrupted run reports shutdown instead of merging results
            assert!(matches!(run.join().unwrap(), Err(EngineError::ShutDown)));
        });

        engine.shutdown().unwrap();
        assert_eq!(engine.get_cache_stats().size, 0);
        assert_eq!(engine.get_performance_stats().total_evaluations, 0);
    }

    #[test]
    fn test_execution_groups_reject_cycles() {
        let engine = engine(EngineConfig::default());
        let a = constant("a", Hardness::Soft, ConstraintResult::satisfied());
        let b = constant("b", Hardness::Soft, ConstraintResult::satisfied()).with_dependencies(["a"]);
        assert_eq!(
            engine.execution_groups(&[a.clone(), b]).unwrap(),
            vec![vec!["a".to_string()], vec!["b".to_string()]]
        );

        let looped = a.with_dependencies(["a"]);
        assert!(matches!(
            engine.execution_groups(&[looped]),
            Err(EngineError::Dependency(DependencyError::CircularDependency { .. }))
        ));
    }

    #[test]
    fn test_empty_constraint_set() {
        let s = schedule();
        let engine = engine(EngineConfig::default());
        let result = engine.evaluate(&EvaluationContext::new(&s, &[])).unwrap();
        assert_eq!(result.overall_score, 1.0);
        assert!(result.hard_constraints_satisfied);
        assert!(result.constraint_results.is_empty());
    }
}
