//! Performance monitoring for constraint evaluation.
//!
//! Tracks `(start, end)` brackets per constraint id, derives statistics and
//! bottlenecks from them, and pushes threshold alerts to observers.
//!
//! All bookkeeping sits behind one `Mutex`; observers are called only after
//! it has been released so they may call back into the monitor.

mod alerts;
mod stats;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;
use crate::dependency::DependencyGraph;
use crate::models::{ConstraintResult, ResultStatus};

pub use alerts::{AlertObserver, AlertType, PerformanceAlert};
pub use stats::{ConstraintStats, OverallStats, RunSummary};

use stats::{duration_ms, ConstraintHistory, ErrorSample, Sample};

/// Handle for an open evaluation bracket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationToken(u64);

#[derive(Clone, Debug)]
struct OpenBracket {
    constraint_id: String,
    started: Instant,
}

/// A bracket opened but not closed within the grace period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuspectedLeak {
    pub token: EvaluationToken,
    pub constraint_id: String,
    pub open_for_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub constraint_id: String,
    pub avg_time_ms: f64,
    /// Transitive dependents from the recorded dependency edges.
    pub dependent_count: usize,
    /// avg_time_ms * (1 + dependent_count)
    pub impact_score: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BottleneckAnalysis {
    /// Highest impact first.
    pub bottlenecks: Vec<Bottleneck>,
    /// Root dependency first. Empty without timing data or with cycles.
    pub critical_path: Vec<String>,
    pub critical_path_time_ms: f64,
}

/// Serializable snapshot for dashboards and logs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub overall: OverallStats,
    /// Sorted by constraint id.
    pub constraints: Vec<ConstraintStats>,
    /// Constraints whose average exceeds the evaluation-time alert threshold.
    pub slow_constraints: Vec<String>,
    pub bottlenecks: BottleneckAnalysis,
    pub suspected_leaks: Vec<SuspectedLeak>,
    pub recent_alerts: Vec<PerformanceAlert>,
    pub recent_runs: Vec<RunSummary>,
}

const ALERT_LOG_CAP: usize = 100;

#[derive(Default)]
struct MonitorState {
    next_token: u64,
    open: FxHashMap<u64, OpenBracket>,
    histories: FxHashMap<String, ConstraintHistory>,
    dependencies: FxHashMap<String, Vec<String>>,
    runs: VecDeque<(Instant, RunSummary)>,
    alerts: VecDeque<PerformanceAlert>,
}

impl MonitorState {
    fn sorted_stats(&self) -> Vec<ConstraintStats> {
        let mut ids: Vec<&String> = self.histories.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| self.histories[id].stats(id))
            .collect()
    }

    fn leaks(&self, grace: Duration, now: Instant) -> Vec<SuspectedLeak> {
        let mut leaks: Vec<SuspectedLeak> = self
            .open
            .iter()
            .filter(|(_, b)| now.duration_since(b.started) >= grace)
            .map(|(&token, b)| SuspectedLeak {
                token: EvaluationToken(token),
                constraint_id: b.constraint_id.clone(),
                open_for_ms: duration_ms(now.duration_since(b.started)),
            })
            .collect();
        leaks.sort_by(|a, b| {
            b.open_for_ms
                .total_cmp(&a.open_for_ms)
                .then_with(|| a.token.0.cmp(&b.token.0))
        });
        leaks
    }

    /// Dependency graph over every constraint the monitor has seen.
    fn dependency_graph(&self) -> DependencyGraph {
        let mut ids: Vec<&str> = self
            .histories
            .keys()
            .chain(self.dependencies.keys())
            .chain(self.dependencies.values().flatten())
            .map(String::as_str)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let empty: Vec<String> = Vec::new();
        DependencyGraph::from_edges(ids.into_iter().map(|id| {
            let deps = self.dependencies.get(id).unwrap_or(&empty);
            (id, deps.iter().map(String::as_str))
        }))
    }

    fn bottlenecks(&self, config: &MonitorConfig) -> BottleneckAnalysis {
        let graph = self.dependency_graph();
        let averages: FxHashMap<String, f64> = self
            .histories
            .iter()
            .filter(|(_, h)| !h.samples.is_empty())
            .map(|(id, h)| (id.clone(), h.stats(id).avg_time_ms))
            .collect();

        let mut bottlenecks: Vec<Bottleneck> = averages
            .iter()
            .filter(|(_, &avg)| avg >= config.bottleneck_time_ms)
            .filter_map(|(id, &avg)| {
                let dependent_count = graph.get_dependents(id).len();
                (dependent_count >= config.bottleneck_min_dependents).then(|| Bottleneck {
                    constraint_id: id.clone(),
                    avg_time_ms: avg,
                    dependent_count,
                    impact_score: avg * (1 + dependent_count) as f64,
                })
            })
            .collect();
        bottlenecks.sort_by(|a, b| {
            b.impact_score
                .total_cmp(&a.impact_score)
                .then_with(|| a.constraint_id.cmp(&b.constraint_id))
        });

        let (critical_path, critical_path_time_ms) = graph
            .critical_path(&averages)
            .map(|p| (p.constraint_ids, p.total_time_ms))
            .unwrap_or_default();

        BottleneckAnalysis {
            bottlenecks,
            critical_path,
            critical_path_time_ms,
        }
    }
}

/// Tracks evaluation timing and outcomes across threads.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    observers: RwLock<Vec<Arc<dyn AlertObserver>>>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an observer for threshold alerts.
    pub fn subscribe(&self, observer: impl AlertObserver + 'static) {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        observers.push(Arc::new(observer));
    }

    fn notify(&self, alerts: Vec<PerformanceAlert>) {
        if alerts.is_empty() {
            return;
        }
        let observers: Vec<Arc<dyn AlertObserver>> = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for alert in &alerts {
            for observer in &observers {
                observer.on_alert(alert);
            }
        }
    }

    /// Open a bracket. Brackets for different ids may overlap.
    pub fn start_evaluation(&self, constraint_id: &str) -> EvaluationToken {
        let mut state = self.state();
        let token = state.next_token;
        state.next_token += 1;
        state.open.insert(
            token,
            OpenBracket {
                constraint_id: constraint_id.to_string(),
                started: Instant::now(),
            },
        );
        EvaluationToken(token)
    }

    /// Close a bracket and record its outcome.
    ///
    /// Returns the measured duration, or `None` for an unknown or already
    /// closed token.
    pub fn end_evaluation(
        &self,
        token: EvaluationToken,
        result: &ConstraintResult,
    ) -> Option<Duration> {
        let bracket = self.state().open.remove(&token.0)?;
        let elapsed = bracket.started.elapsed();
        self.record_evaluation(&bracket.constraint_id, elapsed, result);
        Some(elapsed)
    }

    /// Record an evaluation whose duration was measured elsewhere.
    pub fn record_evaluation(&self, constraint_id: &str, elapsed: Duration, result: &ConstraintResult) {
        let ms = duration_ms(elapsed);
        let alerts = {
            let mut state = self.state();
            let history = state.histories.entry(constraint_id.to_string()).or_default();
            history.push_sample(
                Sample {
                    duration_ms: ms,
                    success: result.status == ResultStatus::Satisfied,
                    score: result.score,
                    recorded_at: Instant::now(),
                },
                self.config.max_samples_per_constraint,
            );
            let stats = history.stats(constraint_id);
            let alerts = alerts::check_thresholds(&self.config.thresholds, &stats, Some(ms));
            push_alerts(&mut state, &alerts);
            alerts
        };
        self.notify(alerts);
    }

    /// Record a failed evaluation.
    pub fn record_error(&self, constraint_id: &str, message: &str) {
        let alerts = {
            let mut state = self.state();
            let history = state.histories.entry(constraint_id.to_string()).or_default();
            history.push_error(
                ErrorSample {
                    message: message.to_string(),
                    recorded_at: Instant::now(),
                },
                self.config.max_samples_per_constraint,
            );
            let stats = history.stats(constraint_id);
            let alerts = alerts::check_thresholds(&self.config.thresholds, &stats, None);
            push_alerts(&mut state, &alerts);
            alerts
        };
        self.notify(alerts);
    }

    /// Replace the recorded dependency edges of a constraint.
    pub fn record_dependencies<I, S>(&self, constraint_id: &str, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deps: Vec<String> = dependencies.into_iter().map(Into::into).collect();
        self.state().dependencies.insert(constraint_id.to_string(), deps);
    }

    pub fn record_run(&self, summary: RunSummary) {
        let mut state = self.state();
        state.runs.push_back((Instant::now(), summary));
        while state.runs.len() > self.config.max_samples_per_constraint.max(1) {
            state.runs.pop_front();
        }
    }

    pub fn get_constraint_stats(&self, constraint_id: &str) -> Option<ConstraintStats> {
        self.state()
            .histories
            .get(constraint_id)
            .map(|h| h.stats(constraint_id))
    }

    pub fn get_overall_stats(&self) -> OverallStats {
        let state = self.state();
        let mut overall = OverallStats::aggregate(&state.sorted_stats());
        overall.total_runs = state.runs.len();
        if !state.runs.is_empty() {
            let total: f64 = state.runs.iter().map(|(_, r)| duration_ms(r.duration)).sum();
            overall.avg_run_time_ms = total / state.runs.len() as f64;
        }
        overall.open_brackets = state.open.len();
        overall
    }

    /// Constraints whose average time exceeds `threshold_ms`, slowest first.
    pub fn get_slow_constraints(&self, threshold_ms: f64) -> Vec<ConstraintStats> {
        let mut slow: Vec<ConstraintStats> = self
            .state()
            .sorted_stats()
            .into_iter()
            .filter(|s| s.count > 0 && s.avg_time_ms > threshold_ms)
            .collect();
        slow.sort_by(|a, b| b.avg_time_ms.total_cmp(&a.avg_time_ms));
        slow
    }

    /// Expensive constraints many others depend on, and the critical path.
    pub fn analyze_bottlenecks(&self) -> BottleneckAnalysis {
        self.state().bottlenecks(&self.config)
    }

    pub fn suspected_leaks(&self) -> Vec<SuspectedLeak> {
        self.state().leaks(self.config.leak_grace_period, Instant::now())
    }

    /// Drop history older than `max_age`. Returns the number of removed records.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let Some(cutoff) = now.checked_sub(max_age) else {
            return 0;
        };
        let mut state = self.state();
        let mut removed = 0;
        for history in state.histories.values_mut() {
            removed += history.retain_since(cutoff);
        }
        state.histories.retain(|_, h| !h.is_empty());

        let runs_before = state.runs.len();
        state.runs.retain(|(at, _)| *at > cutoff);
        removed += runs_before - state.runs.len();
        removed
    }

    /// Zero all recorded state. Subscribed observers stay registered.
    pub fn reset(&self) {
        *self.state() = MonitorState::default();
    }

    pub fn generate_report(&self) -> PerformanceReport {
        let overall = self.get_overall_stats();
        let state = self.state();
        let constraints = state.sorted_stats();
        let slow_constraints = constraints
            .iter()
            .filter(|s| s.count > 0 && s.avg_time_ms > self.config.thresholds.evaluation_time_ms)
            .map(|s| s.constraint_id.clone())
            .collect();
        PerformanceReport {
            generated_at: Utc::now(),
            overall,
            constraints,
            slow_constraints,
            bottlenecks: state.bottlenecks(&self.config),
            suspected_leaks: state.leaks(self.config.leak_grace_period, Instant::now()),
            recent_alerts: state.alerts.iter().cloned().collect(),
            recent_runs: state.runs.iter().map(|(_, r)| r.clone()).collect(),
        }
    }

    /// The report as pretty-printed JSON.
    pub fn export_metrics(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.generate_report())
    }
}

fn push_alerts(state: &mut MonitorState, alerts: &[PerformanceAlert]) {
    for alert in alerts {
        state.alerts.push_back(alert.clone());
        if state.alerts.len() > ALERT_LOG_CAP {
            state.alerts.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertThresholds;
    use crate::models::Violation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn violated() -> ConstraintResult {
        ConstraintResult::violated(0.0, vec![Violation::new("x", "bad", vec![])])
    }

    #[test]
    fn test_bracket_records_stats() {
        let monitor = PerformanceMonitor::default();
        let t1 = monitor.start_evaluation("rest");
        let t2 = monitor.start_evaluation("travel");
        assert_ne!(t1, t2);

        assert!(monitor.end_evaluation(t2, &violated()).is_some());
        assert!(monitor.end_evaluation(t1, &ConstraintResult::satisfied()).is_some());
        // Closing twice is a no-op
        assert!(monitor.end_evaluation(t1, &ConstraintResult::satisfied()).is_none());

        let rest = monitor.get_constraint_stats("rest").unwrap();
        assert_eq!(rest.count, 1);
        assert!((rest.success_rate - 1.0).abs() < 1e-9);
        let travel = monitor.get_constraint_stats("travel").unwrap();
        assert!((travel.success_rate - 0.0).abs() < 1e-9);
        assert_eq!(monitor.get_overall_stats().total_evaluations, 2);
        assert_eq!(monitor.get_overall_stats().open_brackets, 0);
    }

    #[test]
    fn test_slow_constraints_sorted() {
        let monitor = PerformanceMonitor::default();
        monitor.record_evaluation("fast", ms(5), &ConstraintResult::satisfied());
        monitor.record_evaluation("slow", ms(300), &ConstraintResult::satisfied());
        monitor.record_evaluation("medium", ms(80), &ConstraintResult::satisfied());

        let slow: Vec<String> = monitor
            .get_slow_constraints(50.0)
            .into_iter()
            .map(|s| s.constraint_id)
            .collect();
        assert_eq!(slow, vec!["slow", "medium"]);
    }

    #[test]
    fn test_alerts_pushed_to_observers() {
        let config = MonitorConfig {
            thresholds: AlertThresholds {
                evaluation_time_ms: 10.0,
                ..AlertThresholds::default()
            },
            ..MonitorConfig::default()
        };
        let monitor = PerformanceMonitor::new(config);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor.subscribe(move |alert: &PerformanceAlert| {
            sink.lock().unwrap().push(alert.clone());
        });

        monitor.record_evaluation("travel", ms(25), &ConstraintResult::satisfied());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].alert_type, AlertType::SlowEvaluation);
        assert_eq!(seen[0].constraint_id, "travel");
        assert!((seen[0].threshold - 10.0).abs() < 1e-9);
        assert!(seen[0].actual > 24.9);
    }

    #[test]
    fn test_error_rate_alert() {
        let monitor = PerformanceMonitor::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        monitor.subscribe(move |alert: &PerformanceAlert| {
            if alert.alert_type == AlertType::HighErrorRate {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        monitor.record_error("broken", "evaluator failed");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let stats = monitor.get_constraint_stats("broken").unwrap();
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.last_error.as_deref(), Some("evaluator failed"));
    }

    #[test]
    fn test_observer_may_call_back_into_monitor() {
        let monitor = Arc::new(PerformanceMonitor::default());
        let inner = Arc::clone(&monitor);
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_in = Arc::clone(&observed);
        monitor.subscribe(move |alert: &PerformanceAlert| {
            let stats = inner.get_constraint_stats(&alert.constraint_id);
            observed_in.fetch_add(stats.map_or(0, |s| s.error_count), Ordering::SeqCst);
        });
        monitor.record_error("c", "boom");
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bottlenecks_and_critical_path() {
        let monitor = PerformanceMonitor::default();
        monitor.record_evaluation("base", ms(200), &ConstraintResult::satisfied());
        monitor.record_evaluation("mid", ms(20), &ConstraintResult::satisfied());
        monitor.record_evaluation("top", ms(10), &ConstraintResult::satisfied());
        monitor.record_evaluation("side", ms(1), &ConstraintResult::satisfied());
        monitor.record_dependencies("mid", ["base"]);
        monitor.record_dependencies("top", ["mid"]);
        monitor.record_dependencies("side", ["base"]);

        let analysis = monitor.analyze_bottlenecks();
        assert_eq!(analysis.bottlenecks.len(), 1);
        assert_eq!(analysis.bottlenecks[0].constraint_id, "base");
        assert_eq!(analysis.bottlenecks[0].dependent_count, 3);
        assert_eq!(analysis.critical_path, vec!["base", "mid", "top"]);
        assert!((analysis.critical_path_time_ms - 230.0).abs() < 1e-6);
    }

    #[test]
    fn test_suspected_leaks() {
        let config = MonitorConfig {
            leak_grace_period: Duration::ZERO,
            ..MonitorConfig::default()
        };
        let monitor = PerformanceMonitor::new(config);
        let token = monitor.start_evaluation("forgotten");

        let leaks = monitor.suspected_leaks();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].token, token);
        assert_eq!(leaks[0].constraint_id, "forgotten");

        monitor.end_evaluation(token, &ConstraintResult::satisfied());
        assert!(monitor.suspected_leaks().is_empty());
    }

    #[test]
    fn test_cleanup_and_reset() {
        let monitor = PerformanceMonitor::default();
        monitor.record_evaluation("a", ms(1), &ConstraintResult::satisfied());
        monitor.record_error("a", "x");
        monitor.record_run(RunSummary::default());

        assert_eq!(monitor.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(monitor.cleanup(Duration::ZERO), 3);
        assert!(monitor.get_constraint_stats("a").is_none());

        monitor.record_evaluation("b", ms(1), &ConstraintResult::satisfied());
        monitor.start_evaluation("c");
        monitor.reset();
        let overall = monitor.get_overall_stats();
        assert_eq!(overall.total_evaluations, 0);
        assert_eq!(overall.open_brackets, 0);
    }

    #[test]
    fn test_export_metrics_is_json() {
        let monitor = PerformanceMonitor::default();
        monitor.record_evaluation("a", ms(3), &ConstraintResult::partial(0.5));
        monitor.record_run(RunSummary {
            duration: ms(4),
            constraints_evaluated: 1,
            ..RunSummary::default()
        });

        let json = monitor.export_metrics().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["overall"]["total_evaluations"], 1);
        assert_eq!(value["overall"]["total_runs"], 1);
        assert_eq!(value["constraints"][0]["constraint_id"], "a");
    }
}
