//! Timing samples and the statistics derived from them.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One closed evaluation bracket.
#[derive(Clone, Debug)]
pub(crate) struct Sample {
    pub duration_ms: f64,
    pub success: bool,
    pub score: f64,
    pub recorded_at: Instant,
}

#[derive(Clone, Debug)]
pub(crate) struct ErrorSample {
    pub message: String,
    pub recorded_at: Instant,
}

/// Retained history for one constraint.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConstraintHistory {
    pub samples: VecDeque<Sample>,
    pub errors: VecDeque<ErrorSample>,
}

impl ConstraintHistory {
    pub fn push_sample(&mut self, sample: Sample, cap: usize) {
        self.samples.push_back(sample);
        while self.samples.len() > cap.max(1) {
            self.samples.pop_front();
        }
    }

    pub fn push_error(&mut self, error: ErrorSample, cap: usize) {
        self.errors.push_back(error);
        while self.errors.len() > cap.max(1) {
            self.errors.pop_front();
        }
    }

    /// Drop entries recorded at or before `cutoff`. Returns how many were dropped.
    pub fn retain_since(&mut self, cutoff: Instant) -> usize {
        let before = self.samples.len() + self.errors.len();
        self.samples.retain(|s| s.recorded_at > cutoff);
        self.errors.retain(|e| e.recorded_at > cutoff);
        before - self.samples.len() - self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.errors.is_empty()
    }

    pub fn stats(&self, constraint_id: &str) -> ConstraintStats {
        let count = self.samples.len();
        let error_count = self.errors.len();
        let mut stats = ConstraintStats {
            constraint_id: constraint_id.to_string(),
            count,
            error_count,
            last_error: self.errors.back().map(|e| e.message.clone()),
            ..ConstraintStats::default()
        };
        if count + error_count > 0 {
            stats.error_rate = error_count as f64 / (count + error_count) as f64;
        }
        if count == 0 {
            return stats;
        }

        let mut min = f64::INFINITY;
        let mut max = 0.0f64;
        let mut total = 0.0;
        let mut successes = 0usize;
        let mut score_total = 0.0;
        for s in &self.samples {
            min = min.min(s.duration_ms);
            max = max.max(s.duration_ms);
            total += s.duration_ms;
            score_total += s.score;
            if s.success {
                successes += 1;
            }
        }
        stats.total_time_ms = total;
        stats.avg_time_ms = total / count as f64;
        stats.min_time_ms = min;
        stats.max_time_ms = max;
        stats.success_rate = successes as f64 / count as f64;
        stats.average_score = score_total / count as f64;
        stats
    }
}

/// Per-constraint statistics over the retained history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintStats {
    pub constraint_id: String,
    pub count: usize,
    pub avg_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
    pub total_time_ms: f64,
    /// Fraction of brackets whose result was SATISFIED.
    pub success_rate: f64,
    pub average_score: f64,
    pub error_count: usize,
    /// errors / (brackets + errors)
    pub error_rate: f64,
    pub last_error: Option<String>,
}

/// Aggregate over all constraints, weighted by sample count.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallStats {
    pub constraint_count: usize,
    pub total_evaluations: usize,
    pub total_errors: usize,
    pub avg_time_ms: f64,
    pub success_rate: f64,
    pub average_score: f64,
    pub total_runs: usize,
    pub avg_run_time_ms: f64,
    pub open_brackets: usize,
}

impl OverallStats {
    pub(crate) fn aggregate(per_constraint: &[ConstraintStats]) -> Self {
        let mut overall = Self {
            constraint_count: per_constraint.len(),
            ..Self::default()
        };
        let mut weighted_time = 0.0;
        let mut weighted_success = 0.0;
        let mut weighted_score = 0.0;
        for s in per_constraint {
            overall.total_evaluations += s.count;
            overall.total_errors += s.error_count;
            weighted_time += s.avg_time_ms * s.count as f64;
            weighted_success += s.success_rate * s.count as f64;
            weighted_score += s.average_score * s.count as f64;
        }
        if overall.total_evaluations > 0 {
            let n = overall.total_evaluations as f64;
            overall.avg_time_ms = weighted_time / n;
            overall.success_rate = weighted_success / n;
            overall.average_score = weighted_score / n;
        }
        overall
    }
}

/// Summary of one engine evaluation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub duration: Duration,
    pub constraints_evaluated: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub errors: usize,
    pub overall_score: f64,
}

pub(crate) fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ms: f64, success: bool, score: f64) -> Sample {
        Sample {
            duration_ms: ms,
            success,
            score,
            recorded_at: Instant::now(),
        }
    }

    #[test]
    fn test_constraint_stats() {
        let mut history = ConstraintHistory::default();
        history.push_sample(sample(10.0, true, 1.0), 100);
        history.push_sample(sample(30.0, false, 0.5), 100);
        history.push_error(
            ErrorSample {
                message: "boom".to_string(),
                recorded_at: Instant::now(),
            },
            100,
        );

        let stats = history.stats("c1");
        assert_eq!(stats.count, 2);
        assert!((stats.avg_time_ms - 20.0).abs() < 1e-9);
        assert!((stats.min_time_ms - 10.0).abs() < 1e-9);
        assert!((stats.max_time_ms - 30.0).abs() < 1e-9);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert!((stats.average_score - 0.75).abs() < 1e-9);
        assert!((stats.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_history_cap() {
        let mut history = ConstraintHistory::default();
        for i in 0..5 {
            history.push_sample(sample(i as f64, true, 1.0), 3);
        }
        assert_eq!(history.samples.len(), 3);
        assert!((history.samples[0].duration_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_overall_is_count_weighted() {
        let a = ConstraintStats {
            constraint_id: "a".to_string(),
            count: 3,
            avg_time_ms: 10.0,
            success_rate: 1.0,
            average_score: 1.0,
            ..ConstraintStats::default()
        };
        let b = ConstraintStats {
            constraint_id: "b".to_string(),
            count: 1,
            avg_time_ms: 50.0,
            success_rate: 0.0,
            average_score: 0.0,
            ..ConstraintStats::default()
        };
        let overall = OverallStats::aggregate(&[a, b]);
        assert_eq!(overall.total_evaluations, 4);
        assert!((overall.avg_time_ms - 20.0).abs() < 1e-9);
        assert!((overall.success_rate - 0.75).abs() < 1e-9);
    }
}
