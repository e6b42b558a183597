//! Alert evaluation for the `performance_alerts` view
//!
//! The alert set is the current truth, not an event log: every pass
//! evaluates the trailing windows from scratch and an alert disappears as
//! soon as its condition stops holding. Alerts are keyed by
//! `(report_id, alert_type, window_start)`, and a key seen in the previous
//! pass keeps its id and `detected_at`.

use crate::analytics::aggregation::GrainFold;
use crate::analytics::config::AlertConfig;
use crate::models::ReportExecution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Kind of performance alert
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
    /// A single execution ran far longer than its report usually does
    Duration,
    /// A report's success rate dropped below the floor
    FailureRate,
}

/// Alert severity, scaled by how far past its threshold the measurement is
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Severity of a duration over its threshold, by `measured / threshold`
    pub fn for_duration_ratio(ratio: f64) -> Self {
        if ratio <= 1.25 {
            AlertSeverity::Low
        } else if ratio <= 1.5 {
            AlertSeverity::Medium
        } else if ratio <= 2.0 {
            AlertSeverity::High
        } else {
            AlertSeverity::Critical
        }
    }

    /// Severity of a success rate under its floor, by `floor - measured`
    pub fn for_rate_deficit(deficit: f64) -> Self {
        if deficit <= 0.1 {
            AlertSeverity::Low
        } else if deficit <= 0.25 {
            AlertSeverity::Medium
        } else if deficit <= 0.5 {
            AlertSeverity::High
        } else {
            AlertSeverity::Critical
        }
    }
}

/// Identity of an alert across recomputations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub report_id: Uuid,
    pub alert_type: AlertType,
    pub window_start: DateTime<Utc>,
}

impl AlertKey {
    /// Stable fingerprint of the key
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.report_id.as_bytes());
        hasher.update(self.alert_type.to_string().as_bytes());
        hasher.update(self.window_start.timestamp_millis().to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

/// One active performance alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub id: String,
    pub report_id: Uuid,
    pub alert_type: AlertType,
    pub window_start: DateTime<Utc>,
    /// Offending execution, for duration alerts
    pub execution_id: Option<Uuid>,
    pub reason: String,
    pub severity: AlertSeverity,
    pub measured: f64,
    pub threshold: f64,
    /// First pass that saw the condition
    pub detected_at: DateTime<Utc>,
}

impl PerformanceAlert {
    fn new(key: AlertKey, now: DateTime<Utc>) -> Self {
        Self {
            id: key.fingerprint(),
            report_id: key.report_id,
            alert_type: key.alert_type,
            window_start: key.window_start,
            execution_id: None,
            reason: String::new(),
            severity: AlertSeverity::Low,
            measured: 0.0,
            threshold: 0.0,
            detected_at: now,
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey {
            report_id: self.report_id,
            alert_type: self.alert_type,
            window_start: self.window_start,
        }
    }
}

/// Applies the configured thresholds to executions
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    config: AlertConfig,
}

impl AlertEvaluator {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Duration threshold for a report given its baseline p95.
    ///
    /// The ceiling always applies; without a baseline it is the only bound.
    pub fn duration_threshold(&self, baseline_p95: Option<f64>) -> f64 {
        let ceiling = self.config.duration_ceiling_ms as f64;
        match baseline_p95 {
            Some(p95) => (p95 * self.config.duration_multiplier).min(ceiling),
            None => ceiling,
        }
    }

    /// Test one terminal execution against its report's threshold
    pub fn check_duration(
        &self,
        execution: &ReportExecution,
        baseline_p95: Option<f64>,
        now: DateTime<Utc>,
    ) -> Option<PerformanceAlert> {
        let duration_ms = execution.duration_ms.filter(|_| execution.is_terminal())?;
        let threshold = self.duration_threshold(baseline_p95);
        let measured = duration_ms as f64;
        if measured <= threshold {
            return None;
        }

        let key = AlertKey {
            report_id: execution.report_id,
            alert_type: AlertType::Duration,
            window_start: execution.start_time,
        };
        let reason = match baseline_p95 {
            Some(p95) if threshold < self.config.duration_ceiling_ms as f64 => format!(
                "duration {}ms exceeds {:.0}ms ({}x p95 of {:.0}ms)",
                duration_ms, threshold, self.config.duration_multiplier, p95
            ),
            _ => format!(
                "duration {}ms exceeds the {}ms ceiling",
                duration_ms, self.config.duration_ceiling_ms
            ),
        };

        Some(PerformanceAlert {
            execution_id: Some(execution.id),
            reason,
            severity: AlertSeverity::for_duration_ratio(measured / threshold),
            measured,
            threshold,
            ..PerformanceAlert::new(key, now)
        })
    }

    /// Test a report's success rate over the failure-rate window
    pub fn check_failure_rate(
        &self,
        report_id: Uuid,
        window: &GrainFold,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<PerformanceAlert> {
        if (window.total as usize) < self.config.failure_rate_min_executions.max(1) {
            return None;
        }
        let rate = window.success_rate()?;
        let floor = self.config.failure_rate_floor;
        if rate >= floor {
            return None;
        }

        let key = AlertKey {
            report_id,
            alert_type: AlertType::FailureRate,
            window_start,
        };

        Some(PerformanceAlert {
            reason: format!(
                "success rate {:.2} below floor {:.2} over {} executions",
                rate, floor, window.total
            ),
            severity: AlertSeverity::for_rate_deficit(floor - rate),
            measured: rate,
            threshold: floor,
            ..PerformanceAlert::new(key, now)
        })
    }

    /// Evaluate every rule over the executions of the trailing windows.
    ///
    /// `recent` holds the valid terminal executions started within the
    /// evaluation window, `baselines` the baseline p95 of each report and
    /// `rate_windows` the per-report fold over the failure-rate window.
    pub fn evaluate(
        &self,
        recent: &[ReportExecution],
        baselines: &HashMap<Uuid, f64>,
        rate_windows: &BTreeMap<Uuid, GrainFold>,
        rate_window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BTreeMap<AlertKey, PerformanceAlert> {
        let mut alerts: BTreeMap<AlertKey, PerformanceAlert> = BTreeMap::new();

        for execution in recent {
            let baseline = baselines.get(&execution.report_id).copied();
            if let Some(alert) = self.check_duration(execution, baseline, now) {
                match alerts.get(&alert.key()) {
                    Some(existing)
                        if (existing.measured, existing.execution_id)
                            >= (alert.measured, alert.execution_id) => {}
                    _ => {
                        alerts.insert(alert.key(), alert);
                    }
                }
            }
        }

        for (report_id, fold) in rate_windows {
            if let Some(alert) = self.check_failure_rate(*report_id, fold, rate_window_start, now) {
                alerts.insert(alert.key(), alert);
            }
        }

        alerts
    }
}

/// Keep the identity of alerts that were already active
pub fn carry_over(
    previous: Option<&BTreeMap<AlertKey, PerformanceAlert>>,
    mut next: BTreeMap<AlertKey, PerformanceAlert>,
) -> BTreeMap<AlertKey, PerformanceAlert> {
    if let Some(previous) = previous {
        for (key, alert) in next.iter_mut() {
            if let Some(existing) = previous.get(key) {
                alert.id = existing.id.clone();
                alert.detected_at = existing.detected_at;
            }
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionStatus;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn finished(report_id: Uuid, duration_ms: i64, status: ExecutionStatus) -> ReportExecution {
        let start = now() - Duration::hours(1);
        let mut exec = ReportExecution::start(report_id, "ops", start);
        exec.complete(status, start + Duration::milliseconds(duration_ms), 0, None)
            .unwrap();
        exec
    }

    #[test]
    fn test_duration_alert_iff_above_multiplied_p95() {
        let evaluator = AlertEvaluator::new(AlertConfig::default());
        let report_id = Uuid::new_v4();

        // p95 4080ms * 2.0 = 8160ms
        let slow = finished(report_id, 9000, ExecutionStatus::Success);
        let alert = evaluator.check_duration(&slow, Some(4080.0), now()).unwrap();
        assert_eq!(alert.threshold, 8160.0);
        assert_eq!(alert.execution_id, Some(slow.id));
        assert_eq!(alert.severity, AlertSeverity::Low);

        let fine = finished(report_id, 8160, ExecutionStatus::Success);
        assert!(evaluator.check_duration(&fine, Some(4080.0), now()).is_none());
    }

    #[test]
    fn test_ceiling_applies_without_history() {
        let evaluator = AlertEvaluator::new(AlertConfig::default());
        let report_id = Uuid::new_v4();

        let long = finished(report_id, 31 * 60 * 1000, ExecutionStatus::Error);
        let alert = evaluator.check_duration(&long, None, now()).unwrap();
        assert_eq!(alert.threshold, 1_800_000.0);
        assert!(alert.reason.contains("ceiling"));

        let short = finished(report_id, 60_000, ExecutionStatus::Success);
        assert!(evaluator.check_duration(&short, None, now()).is_none());

        // the ceiling caps a huge baseline
        assert_eq!(evaluator.duration_threshold(Some(3_600_000.0)), 1_800_000.0);
    }

    #[test]
    fn test_failure_rate_alert() {
        let evaluator = AlertEvaluator::new(AlertConfig::default());
        let report_id = Uuid::new_v4();
        let executions = vec![
            finished(report_id, 10, ExecutionStatus::Success),
            finished(report_id, 10, ExecutionStatus::Error),
            finished(report_id, 10, ExecutionStatus::Error),
            finished(report_id, 10, ExecutionStatus::Cancelled),
        ];
        let fold = GrainFold::from_executions(&executions);
        let window_start = now() - Duration::hours(24);

        let alert = evaluator
            .check_failure_rate(report_id, &fold, window_start, now())
            .unwrap();
        assert_eq!(alert.measured, 0.25);
        assert_eq!(alert.severity, AlertSeverity::Critical);

        let healthy = GrainFold::from_executions(&executions[..1]);
        assert!(evaluator
            .check_failure_rate(report_id, &healthy, window_start, now())
            .is_none());
    }

    #[test]
    fn test_evaluate_is_idempotent_and_keeps_identity() {
        let evaluator = AlertEvaluator::new(AlertConfig::default());
        let report_id = Uuid::new_v4();
        let recent = vec![finished(report_id, 5000, ExecutionStatus::Error)];
        let baselines = HashMap::from([(report_id, 1000.0)]);
        let windows = BTreeMap::from([(report_id, GrainFold::from_executions(&recent))]);
        let window_start = now() - Duration::hours(24);

        let first = evaluator.evaluate(&recent, &baselines, &windows, window_start, now());
        assert_eq!(first.len(), 2);

        let later = now() + Duration::minutes(1);
        let second = carry_over(
            Some(&first),
            evaluator.evaluate(&recent, &baselines, &windows, window_start, later),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let key = AlertKey {
            report_id: Uuid::nil(),
            alert_type: AlertType::FailureRate,
            window_start: now(),
        };
        assert_eq!(key.fingerprint(), key.fingerprint());
        assert_eq!(key.fingerprint().len(), 64);
    }
}
