//! Aggregation functions folding terminal executions into view rows
//!
//! Every fold here is order independent: counts and integer sums commute,
//! and duration samples are sorted by `(duration, id)` before any
//! percentile is taken. Folding a grain's executions in scan order or in
//! any other order yields identical rows, which is what lets an
//! incremental pass re-scan only the affected grains.

use crate::analytics::statistics::{mean, success_rate, DurationStats};
use crate::analytics::views::{
    recent_order, DailyMetricsRow, DimensionPerformanceRow, ReportSummaryRow, TrendRow,
    UserActivityRow,
};
use crate::models::{ExecutionStatus, Report, ReportExecution};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Running fold over the terminal executions of one grain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrainFold {
    pub total: u64,
    pub success: u64,
    pub error: u64,
    pub cancelled: u64,
    pub records_processed: u64,
    duration_total: i128,
    samples: Vec<(i64, Uuid)>,
    last: Option<(DateTime<Utc>, Uuid, ExecutionStatus)>,
    last_started: Option<DateTime<Utc>>,
    reports: BTreeSet<Uuid>,
}

impl GrainFold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_executions<'a>(executions: impl IntoIterator<Item = &'a ReportExecution>) -> Self {
        let mut fold = Self::new();
        for execution in executions {
            fold.push(execution);
        }
        fold
    }

    /// Fold one execution; running executions are ignored
    pub fn push(&mut self, execution: &ReportExecution) {
        let Some(duration_ms) = execution.duration_ms.filter(|_| execution.is_terminal()) else {
            return;
        };

        self.total += 1;
        match execution.status {
            ExecutionStatus::Success => self.success += 1,
            ExecutionStatus::Error => self.error += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            ExecutionStatus::Running => {}
        }
        self.records_processed += execution.records_processed;
        self.duration_total += duration_ms as i128;
        self.samples.push((duration_ms, execution.id));
        self.reports.insert(execution.report_id);

        let candidate = (execution.start_time, execution.id, execution.status);
        if self
            .last
            .map_or(true, |(at, id, _)| (candidate.0, candidate.1) > (at, id))
        {
            self.last = Some(candidate);
        }
        self.last_started = self.last_started.max(Some(execution.start_time));
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn success_rate(&self) -> Option<f64> {
        success_rate(self.success as usize, self.total as usize)
    }

    pub fn avg_duration_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| mean(self.duration_total, self.total as usize))
    }

    pub fn duration_stats(&self) -> Option<DurationStats> {
        DurationStats::from_samples(self.samples.clone())
    }

    pub fn distinct_reports(&self) -> u64 {
        self.reports.len() as u64
    }
}

/// Fold executions into per-grain folds
pub fn fold_by<'a, K, F>(
    executions: impl IntoIterator<Item = &'a ReportExecution>,
    grain: F,
) -> BTreeMap<K, GrainFold>
where
    K: Ord,
    F: Fn(&ReportExecution) -> K,
{
    let mut folds: BTreeMap<K, GrainFold> = BTreeMap::new();
    for execution in executions {
        if execution.is_terminal() {
            folds.entry(grain(execution)).or_default().push(execution);
        }
    }
    folds
}

/// Turn folds into rows in parallel, dropping grains that yield no row
pub fn finalize<K, R, F>(folds: BTreeMap<K, GrainFold>, row: F) -> BTreeMap<K, R>
where
    K: Ord + Send,
    R: Send,
    F: Fn(&K, GrainFold) -> Option<R> + Send + Sync,
{
    folds
        .into_par_iter()
        .filter_map(|(key, fold)| row(&key, fold).map(|r| (key, r)))
        .collect()
}

pub fn summary_row(report: &Report, fold: &GrainFold) -> ReportSummaryRow {
    ReportSummaryRow {
        report_id: report.id,
        name: report.name.clone(),
        report_type: report.report_type.clone(),
        category: report.category.clone(),
        provider: report.provider.clone(),
        total_executions: fold.total,
        success_count: fold.success,
        error_count: fold.error,
        cancelled_count: fold.cancelled,
        success_rate: fold.success_rate(),
        avg_duration_ms: fold.avg_duration_ms(),
        last_run_at: fold.last.map(|(at, _, _)| at),
        last_status: fold.last.map(|(_, _, status)| status),
        records_processed: fold.records_processed,
    }
}

pub fn daily_row(report_id: Uuid, day: NaiveDate, fold: &GrainFold) -> Option<DailyMetricsRow> {
    let stats = fold.duration_stats()?;

    Some(DailyMetricsRow {
        report_id,
        day,
        execution_count: fold.total,
        success_count: fold.success,
        error_count: fold.error,
        cancelled_count: fold.cancelled,
        success_rate: fold.success_rate(),
        avg_duration_ms: stats.avg_ms,
        min_duration_ms: stats.min_ms,
        max_duration_ms: stats.max_ms,
        p50_duration_ms: stats.percentiles.p50,
        p90_duration_ms: stats.percentiles.p90,
        p95_duration_ms: stats.percentiles.p95,
        p99_duration_ms: stats.percentiles.p99,
        records_processed: fold.records_processed,
    })
}

/// Dimension row; a value whose reports never finished still gets a row
pub fn dimension_row(dimension: &str, report_count: u64, fold: &GrainFold) -> DimensionPerformanceRow {
    let stats = fold.duration_stats();

    DimensionPerformanceRow {
        dimension: dimension.to_string(),
        report_count,
        execution_count: fold.total,
        success_count: fold.success,
        success_rate: fold.success_rate(),
        avg_duration_ms: stats.map(|s| s.avg_ms),
        min_duration_ms: stats.map(|s| s.min_ms),
        max_duration_ms: stats.map(|s| s.max_ms),
        p50_duration_ms: stats.map(|s| s.percentiles.p50),
        p95_duration_ms: stats.map(|s| s.percentiles.p95),
    }
}

pub fn user_row(started_by: &str, fold: &GrainFold) -> Option<UserActivityRow> {
    Some(UserActivityRow {
        started_by: started_by.to_string(),
        execution_count: fold.total,
        success_count: fold.success,
        success_rate: fold.success_rate(),
        avg_duration_ms: fold.avg_duration_ms()?,
        records_processed: fold.records_processed,
        last_used_at: fold.last_started?,
        distinct_reports: fold.distinct_reports(),
    })
}

/// Trend row without deltas; see [`apply_trend_deltas`]
pub fn trend_row(
    report_id: Uuid,
    bucket_start: DateTime<Utc>,
    width: Duration,
    fold: &GrainFold,
) -> Option<TrendRow> {
    Some(TrendRow {
        report_id,
        bucket_start,
        bucket_end: bucket_start + width,
        execution_count: fold.total,
        success_count: fold.success,
        success_rate: fold.success_rate(),
        avg_duration_ms: fold.avg_duration_ms()?,
        count_delta: None,
        avg_duration_delta_ms: None,
        success_rate_delta: None,
    })
}

/// Fill the delta fields of one report's buckets.
///
/// `rows` must be that report's buckets in ascending order. A bucket is
/// compared with the adjacent earlier time bucket: when that bucket had no
/// terminal executions the count delta is taken against zero and the ratio
/// deltas stay null. The earliest bucket has no deltas at all.
pub fn apply_trend_deltas(rows: &mut [TrendRow], width: Duration) {
    for i in 0..rows.len() {
        let (before, rest) = rows.split_at_mut(i);
        let row = &mut rest[0];

        match before.last() {
            None => {
                row.count_delta = None;
                row.avg_duration_delta_ms = None;
                row.success_rate_delta = None;
            }
            Some(prev) if prev.bucket_start + width == row.bucket_start => {
                row.count_delta = Some(row.execution_count as i64 - prev.execution_count as i64);
                row.avg_duration_delta_ms = Some(row.avg_duration_ms - prev.avg_duration_ms);
                row.success_rate_delta = match (row.success_rate, prev.success_rate) {
                    (Some(now), Some(then)) => Some(now - then),
                    _ => None,
                };
            }
            Some(_) => {
                row.count_delta = Some(row.execution_count as i64);
                row.avg_duration_delta_ms = None;
                row.success_rate_delta = None;
            }
        }
    }
}

/// Merge new or updated executions into a bounded recent window.
///
/// Rows are deduplicated by id with `incoming` taking precedence, ordered
/// by `(start_time desc, id desc)` and cut to `limit`.
pub fn merge_recent(
    window: &[ReportExecution],
    incoming: impl IntoIterator<Item = ReportExecution>,
    limit: usize,
) -> Vec<ReportExecution> {
    let mut by_id: HashMap<Uuid, ReportExecution> =
        window.iter().map(|e| (e.id, e.clone())).collect();
    for execution in incoming {
        by_id.insert(execution.id, execution);
    }

    let mut merged: Vec<ReportExecution> = by_id.into_values().collect();
    merged.sort_by(recent_order);
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn finished(
        report_id: Uuid,
        user: &str,
        start: DateTime<Utc>,
        duration_ms: i64,
        status: ExecutionStatus,
    ) -> ReportExecution {
        let mut exec = ReportExecution::start(report_id, user, start);
        exec.complete(status, start + Duration::milliseconds(duration_ms), 10, None)
            .unwrap();
        exec
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_row_scenario() {
        let report_id = Uuid::new_v4();
        let mut executions: Vec<ReportExecution> = [100, 200, 300, 400]
            .iter()
            .enumerate()
            .map(|(i, d)| {
                finished(report_id, "ana", t0() + Duration::minutes(i as i64), *d, ExecutionStatus::Success)
            })
            .collect();
        executions.push(finished(report_id, "ana", t0() + Duration::hours(1), 5000, ExecutionStatus::Error));
        executions.push(ReportExecution::start(report_id, "ana", t0() + Duration::hours(2)));

        let fold = GrainFold::from_executions(&executions);
        let row = daily_row(report_id, t0().date_naive(), &fold).unwrap();

        assert_eq!(row.execution_count, 5);
        assert_eq!(row.success_rate, Some(0.8));
        assert_eq!(row.avg_duration_ms, 1200.0);
        assert!((row.p95_duration_ms - 4080.0).abs() < 1e-9);
        assert_eq!(row.min_duration_ms, 100);
        assert_eq!(row.max_duration_ms, 5000);
        assert_eq!(row.records_processed, 50);
    }

    #[test]
    fn test_summary_without_terminal_runs_has_null_rate() {
        let report = Report::new("Subnets", "inventory", "network", "aws");
        let running = ReportExecution::start(report.id, "ana", t0());

        let row = summary_row(&report, &GrainFold::from_executions([&running]));
        assert_eq!(row.total_executions, 0);
        assert_eq!(row.success_rate, None);
        assert_eq!(row.avg_duration_ms, None);
        assert_eq!(row.last_status, None);
    }

    #[test]
    fn test_summary_last_run_is_latest_terminal() {
        let report = Report::new("Subnets", "inventory", "network", "aws");
        let older = finished(report.id, "ana", t0(), 10, ExecutionStatus::Success);
        let newer = finished(report.id, "bo", t0() + Duration::hours(1), 10, ExecutionStatus::Cancelled);

        let row = summary_row(&report, &GrainFold::from_executions([&newer, &older]));
        assert_eq!(row.last_run_at, Some(newer.start_time));
        assert_eq!(row.last_status, Some(ExecutionStatus::Cancelled));
        assert_eq!(row.cancelled_count, 1);
    }

    #[test]
    fn test_fold_by_and_finalize() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let executions = vec![
            finished(a, "ana", t0(), 100, ExecutionStatus::Success),
            finished(b, "ana", t0(), 300, ExecutionStatus::Error),
            finished(a, "bo", t0(), 200, ExecutionStatus::Success),
        ];

        let folds = fold_by(&executions, |e| e.started_by.clone());
        let rows = finalize(folds, |user, fold| user_row(user, &fold));

        let ana = &rows["ana"];
        assert_eq!(ana.execution_count, 2);
        assert_eq!(ana.distinct_reports, 2);
        assert_eq!(ana.avg_duration_ms, 200.0);
        assert_eq!(ana.success_rate, Some(0.5));
        assert_eq!(rows["bo"].records_processed, 10);
    }

    #[test]
    fn test_trend_deltas() {
        let report_id = Uuid::new_v4();
        let width = Duration::days(7);
        let first = t0();
        let bucket = |start: DateTime<Utc>, durations: &[i64], status: ExecutionStatus| {
            let executions: Vec<_> = durations
                .iter()
                .map(|d| finished(report_id, "ana", start, *d, status))
                .collect();
            trend_row(report_id, start, width, &GrainFold::from_executions(&executions)).unwrap()
        };

        let mut rows = vec![
            bucket(first, &[100, 300], ExecutionStatus::Success),
            bucket(first + width, &[400], ExecutionStatus::Error),
            bucket(first + width * 3, &[50], ExecutionStatus::Success),
        ];
        apply_trend_deltas(&mut rows, width);

        assert_eq!(rows[0].count_delta, None);
        assert_eq!(rows[0].success_rate_delta, None);

        assert_eq!(rows[1].count_delta, Some(-1));
        assert_eq!(rows[1].avg_duration_delta_ms, Some(200.0));
        assert_eq!(rows[1].success_rate_delta, Some(-1.0));

        // previous bucket was empty
        assert_eq!(rows[2].count_delta, Some(1));
        assert_eq!(rows[2].avg_duration_delta_ms, None);
    }

    #[test]
    fn test_merge_recent_keeps_top_n() {
        let report_id = Uuid::new_v4();
        let window: Vec<_> = (0..3)
            .map(|i| ReportExecution::start(report_id, "ana", t0() + Duration::minutes(i)))
            .collect();
        let window = merge_recent(&[], window, 3);

        // older than the current minimum of a full window
        let old = ReportExecution::start(report_id, "ana", t0() - Duration::minutes(5));
        assert_eq!(merge_recent(&window, [old], 3), window);

        let mut completed = window[2].clone();
        completed
            .complete(ExecutionStatus::Success, completed.start_time + Duration::seconds(1), 0, None)
            .unwrap();
        let merged = merge_recent(&window, [completed.clone()], 3);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2], completed);
        assert!(merged.windows(2).all(|w| recent_order(&w[0], &w[1]).is_lt()));
    }
}
