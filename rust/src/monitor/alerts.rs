//! Threshold alerts pushed to registered observers.

use serde::{Deserialize, Serialize};

use crate::config::AlertThresholds;

use super::stats::ConstraintStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// A single evaluation exceeded `evaluation_time_ms`.
    SlowEvaluation,
    /// Success rate fell below `success_rate`.
    LowSuccessRate,
    /// Error rate rose above `error_rate`.
    HighErrorRate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub alert_type: AlertType,
    pub constraint_id: String,
    pub threshold: f64,
    pub actual: f64,
}

/// Receives alerts as they fire.
pub trait AlertObserver: Send + Sync {
    fn on_alert(&self, alert: &PerformanceAlert);
}

impl<F> AlertObserver for F
where
    F: Fn(&PerformanceAlert) + Send + Sync,
{
    fn on_alert(&self, alert: &PerformanceAlert) {
        self(alert)
    }
}

/// Alerts triggered by one closed bracket (`duration_ms`) or recorded error (`None`).
pub(crate) fn check_thresholds(
    thresholds: &AlertThresholds,
    stats: &ConstraintStats,
    duration_ms: Option<f64>,
) -> Vec<PerformanceAlert> {
    let mut alerts = Vec::new();
    let alert = |alert_type, threshold, actual| PerformanceAlert {
        alert_type,
        constraint_id: stats.constraint_id.clone(),
        threshold,
        actual,
    };

    if let Some(ms) = duration_ms {
        if ms > thresholds.evaluation_time_ms {
            alerts.push(alert(AlertType::SlowEvaluation, thresholds.evaluation_time_ms, ms));
        }
        if stats.count >= thresholds.min_samples && stats.success_rate < thresholds.success_rate {
            alerts.push(alert(
                AlertType::LowSuccessRate,
                thresholds.success_rate,
                stats.success_rate,
            ));
        }
    }
    if stats.count + stats.error_count >= thresholds.min_samples
        && stats.error_rate > thresholds.error_rate
    {
        alerts.push(alert(AlertType::HighErrorRate, thresholds.error_rate, stats.error_rate));
    }
    alerts
}
