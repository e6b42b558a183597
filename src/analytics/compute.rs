//! Per-view recompute passes
//!
//! A full pass folds the whole log. An incremental pass reads the delta
//! since the previous snapshot, works out which grains it touches, and
//! re-scans only those grains through the log's indexes. Executions that
//! were still running at the previous pass are re-read so that their
//! completion lands in the grain they started in.

use crate::analytics::aggregation::{
    apply_trend_deltas, daily_row, dimension_row, finalize, fold_by, merge_recent, summary_row,
    trend_row, user_row, GrainFold,
};
use crate::analytics::alerts::AlertEvaluator;
use crate::analytics::config::AnalyticsConfig;
use crate::analytics::error::{AnalyticsError, AnalyticsResult};
use crate::analytics::statistics::DurationStats;
use crate::analytics::views::{
    DimensionPerformanceRow, PassWatermark, TrendRow, ViewData, ViewName, ViewSnapshot,
};
use crate::metrics::INVALID_EXECUTION_RECORDS_TOTAL;
use crate::models::{
    bucket_start, day_range, utc_day, Report, ReportDimension, ReportExecution, TimeRange,
};
use crate::state::{collect_executions, ExecutionFilter, ExecutionLogStore, ReportCache, ReportFilter};
use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// How a single pass reads the log
#[derive(Debug, Clone)]
pub enum PassPlan {
    Full,
    /// Fold executions started at or after `since` into `previous`
    Incremental {
        since: DateTime<Utc>,
        previous: Arc<ViewSnapshot>,
    },
}

/// Executions read by an incremental pass
struct Delta {
    executions: Vec<ReportExecution>,
    running: BTreeSet<Uuid>,
}

impl Delta {
    fn terminal(&self) -> impl Iterator<Item = &ReportExecution> {
        self.executions.iter().filter(|e| e.is_terminal())
    }
}

/// Everything a pass needs besides the previous snapshot
#[derive(Clone)]
pub struct ComputeContext {
    pub store: Arc<dyn ExecutionLogStore>,
    pub reports: ReportCache,
    pub config: AnalyticsConfig,
    pub evaluator: AlertEvaluator,
}

impl ComputeContext {
    pub fn new(store: Arc<dyn ExecutionLogStore>, config: AnalyticsConfig) -> Self {
        let reports = ReportCache::new(
            store.clone(),
            config.report_cache_capacity,
            std::time::Duration::from_secs(config.report_cache_ttl_secs),
        );
        let evaluator = AlertEvaluator::new(config.alerts.clone());

        Self {
            store,
            reports,
            config,
            evaluator,
        }
    }

    /// Run one pass of `view` as of `now`
    pub async fn compute(
        &self,
        view: ViewName,
        plan: PassPlan,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<ViewSnapshot> {
        let (data, watermark) = match view {
            ViewName::ReportsSummary => self.reports_summary(&plan).await?,
            ViewName::DailyExecutionMetrics => self.daily_metrics(&plan).await?,
            ViewName::ProviderPerformance => {
                self.dimension_performance(view, ReportDimension::Provider, &plan)
                    .await?
            }
            ViewName::CategoryPerformance => {
                self.dimension_performance(view, ReportDimension::Category, &plan)
                    .await?
            }
            ViewName::UserActivity => self.user_activity(&plan).await?,
            ViewName::RecentExecutions => self.recent_executions(&plan).await?,
            ViewName::PerformanceAlerts => self.performance_alerts(&plan, now).await?,
            ViewName::ExecutionTrends => self.execution_trends(&plan).await?,
        };

        debug!(view = %view, rows = data.len(), "View pass finished");
        Ok(ViewSnapshot::new(now, data, watermark))
    }

    /// Drop malformed records, counting each one
    fn retain_valid(&self, view: ViewName, executions: Vec<ReportExecution>) -> Vec<ReportExecution> {
        executions
            .into_iter()
            .filter(|execution| match execution.check_invariants() {
                Ok(()) => true,
                Err(reason) => {
                    let err = AnalyticsError::InvalidExecutionRecord {
                        execution_id: execution.id,
                        reason,
                    };
                    warn!(view = %view, error = %err, "Skipping execution record");
                    INVALID_EXECUTION_RECORDS_TOTAL
                        .with_label_values(&[&view.to_string()])
                        .inc();
                    false
                }
            })
            .collect()
    }

    async fn scan(
        &self,
        view: ViewName,
        filter: &ExecutionFilter,
    ) -> AnalyticsResult<Vec<ReportExecution>> {
        let executions =
            collect_executions(self.store.as_ref(), filter, self.config.scan_page_size).await?;
        Ok(self.retain_valid(view, executions))
    }

    /// The whole log, with the ids still running
    async fn full_scan(
        &self,
        view: ViewName,
    ) -> AnalyticsResult<(Vec<ReportExecution>, BTreeSet<Uuid>)> {
        let executions = self.scan(view, &ExecutionFilter::default()).await?;
        let running = running_ids(&executions);
        Ok((executions, running))
    }

    async fn delta(
        &self,
        view: ViewName,
        since: DateTime<Utc>,
        previous: &ViewSnapshot,
    ) -> AnalyticsResult<Delta> {
        let filter = ExecutionFilter::default().within(TimeRange::since(since));
        let mut executions = self.scan(view, &filter).await?;

        let seen: HashSet<Uuid> = executions.iter().map(|e| e.id).collect();
        let mut refetched = Vec::new();
        for id in previous.watermark.running.iter().filter(|id| !seen.contains(*id)) {
            if let Some(execution) = self.store.get_execution(id).await? {
                refetched.push(execution);
            }
        }
        executions.extend(self.retain_valid(view, refetched));

        let running = running_ids(&executions);
        debug!(
            view = %view,
            since = %since,
            executions = executions.len(),
            running = running.len(),
            "Read incremental delta"
        );
        Ok(Delta {
            executions,
            running,
        })
    }

    async fn list_reports(&self) -> AnalyticsResult<Vec<Report>> {
        let reports = self.store.list_reports(&ReportFilter::default()).await?;
        self.reports.prime(&reports).await;
        Ok(reports)
    }

    async fn reports_summary(&self, plan: &PassPlan) -> AnalyticsResult<(ViewData, PassWatermark)> {
        let view = ViewName::ReportsSummary;
        let reports = self.list_reports().await?;

        match plan {
            PassPlan::Full => {
                let (executions, running) = self.full_scan(view).await?;
                let folds = fold_by(&executions, |e| e.report_id);
                let empty = GrainFold::new();
                let rows = reports
                    .par_iter()
                    .map(|report| {
                        let fold = folds.get(&report.id).unwrap_or(&empty);
                        (report.id, summary_row(report, fold))
                    })
                    .collect();

                Ok((ViewData::ReportsSummary(rows), watermark(running)))
            }
            PassPlan::Incremental { since, previous } => {
                let ViewData::ReportsSummary(previous_rows) = &previous.data else {
                    return Err(mismatch(view));
                };
                let delta = self.delta(view, *since, previous).await?;
                let affected: BTreeSet<Uuid> = delta.terminal().map(|e| e.report_id).collect();

                let mut rows = BTreeMap::new();
                for report in &reports {
                    let row = match previous_rows.get(&report.id) {
                        Some(row) if !affected.contains(&report.id) => {
                            let mut row = row.clone();
                            row.name = report.name.clone();
                            row.report_type = report.report_type.clone();
                            row.category = report.category.clone();
                            row.provider = report.provider.clone();
                            row
                        }
                        _ => {
                            let executions = self
                                .scan(view, &ExecutionFilter::for_report(report.id))
                                .await?;
                            summary_row(report, &GrainFold::from_executions(&executions))
                        }
                    };
                    rows.insert(report.id, row);
                }

                Ok((ViewData::ReportsSummary(rows), watermark(delta.running)))
            }
        }
    }

    async fn daily_metrics(&self, plan: &PassPlan) -> AnalyticsResult<(ViewData, PassWatermark)> {
        let view = ViewName::DailyExecutionMetrics;

        match plan {
            PassPlan::Full => {
                let (executions, running) = self.full_scan(view).await?;
                let folds = fold_by(&executions, |e| (e.report_id, utc_day(e.start_time)));
                let rows = finalize(folds, |(report_id, day), fold| {
                    daily_row(*report_id, *day, &fold)
                });

                Ok((ViewData::DailyExecutionMetrics(rows), watermark(running)))
            }
            PassPlan::Incremental { since, previous } => {
                let ViewData::DailyExecutionMetrics(previous_rows) = &previous.data else {
                    return Err(mismatch(view));
                };
                let delta = self.delta(view, *since, previous).await?;
                let affected: BTreeSet<(Uuid, NaiveDate)> = delta
                    .terminal()
                    .map(|e| (e.report_id, utc_day(e.start_time)))
                    .collect();

                let mut rows = previous_rows.clone();
                for (report_id, day) in affected {
                    let filter = ExecutionFilter::for_report(report_id).within(day_range(day));
                    let executions = self.scan(view, &filter).await?;
                    match daily_row(report_id, day, &GrainFold::from_executions(&executions)) {
                        Some(row) => rows.insert((report_id, day), row),
                        None => rows.remove(&(report_id, day)),
                    };
                }

                Ok((ViewData::DailyExecutionMetrics(rows), watermark(delta.running)))
            }
        }
    }

    async fn dimension_performance(
        &self,
        view: ViewName,
        dimension: ReportDimension,
        plan: &PassPlan,
    ) -> AnalyticsResult<(ViewData, PassWatermark)> {
        let reports = self.list_reports().await?;
        let members = members_by(&reports, dimension);
        let value_of: HashMap<Uuid, &str> = reports
            .iter()
            .map(|r| (r.id, r.dimension(dimension)))
            .collect();
        let wrap = |rows: BTreeMap<String, DimensionPerformanceRow>| match dimension {
            ReportDimension::Provider => ViewData::ProviderPerformance(rows),
            _ => ViewData::CategoryPerformance(rows),
        };

        match plan {
            PassPlan::Full => {
                let (executions, running) = self.full_scan(view).await?;
                let mut folds: BTreeMap<&str, GrainFold> = BTreeMap::new();
                for execution in &executions {
                    if let Some(value) = value_of.get(&execution.report_id) {
                        folds.entry(*value).or_default().push(execution);
                    }
                }

                let empty = GrainFold::new();
                let rows = members
                    .par_iter()
                    .map(|(value, ids)| {
                        let fold = folds.get(value.as_str()).unwrap_or(&empty);
                        (value.clone(), dimension_row(value, ids.len() as u64, fold))
                    })
                    .collect();

                Ok((
                    wrap(rows),
                    PassWatermark {
                        running,
                        members,
                    },
                ))
            }
            PassPlan::Incremental { since, previous } => {
                let previous_rows = match &previous.data {
                    ViewData::ProviderPerformance(rows) | ViewData::CategoryPerformance(rows)
                        if previous.view == view =>
                    {
                        rows
                    }
                    _ => return Err(mismatch(view)),
                };
                let delta = self.delta(view, *since, previous).await?;

                // Values touched by new executions or whose report set changed
                let mut affected: BTreeSet<String> = delta
                    .terminal()
                    .filter_map(|e| value_of.get(&e.report_id))
                    .map(|value| value.to_string())
                    .collect();
                let old_members = &previous.watermark.members;
                for value in members.keys().chain(old_members.keys()) {
                    if members.get(value) != old_members.get(value) {
                        affected.insert(value.clone());
                    }
                }

                let mut rows = previous_rows.clone();
                for value in affected {
                    let Some(ids) = members.get(&value) else {
                        rows.remove(&value);
                        continue;
                    };
                    let mut fold = GrainFold::new();
                    for report_id in ids {
                        for execution in self.scan(view, &ExecutionFilter::for_report(*report_id)).await? {
                            fold.push(&execution);
                        }
                    }
                    let row = dimension_row(&value, ids.len() as u64, &fold);
                    rows.insert(value, row);
                }

                Ok((
                    wrap(rows),
                    PassWatermark {
                        running: delta.running,
                        members,
                    },
                ))
            }
        }
    }

    async fn user_activity(&self, plan: &PassPlan) -> AnalyticsResult<(ViewData, PassWatermark)> {
        let view = ViewName::UserActivity;

        match plan {
            PassPlan::Full => {
                let (executions, running) = self.full_scan(view).await?;
                let folds = fold_by(&executions, |e| e.started_by.clone());
                let rows = finalize(folds, |user, fold| user_row(user, &fold));

                Ok((ViewData::UserActivity(rows), watermark(running)))
            }
            PassPlan::Incremental { since, previous } => {
                let ViewData::UserActivity(previous_rows) = &previous.data else {
                    return Err(mismatch(view));
                };
                let delta = self.delta(view, *since, previous).await?;
                let affected: BTreeSet<String> =
                    delta.terminal().map(|e| e.started_by.clone()).collect();

                let mut rows = previous_rows.clone();
                for user in affected {
                    let executions = self.scan(view, &ExecutionFilter::for_user(user.as_str())).await?;
                    match user_row(&user, &GrainFold::from_executions(&executions)) {
                        Some(row) => rows.insert(user, row),
                        None => rows.remove(&user),
                    };
                }

                Ok((ViewData::UserActivity(rows), watermark(delta.running)))
            }
        }
    }

    async fn recent_executions(&self, plan: &PassPlan) -> AnalyticsResult<(ViewData, PassWatermark)> {
        let view = ViewName::RecentExecutions;
        let limit = self.config.recent_window;

        match plan {
            PassPlan::Full => {
                let (executions, running) = self.full_scan(view).await?;
                let rows = merge_recent(&[], executions, limit);
                Ok((ViewData::RecentExecutions(rows), watermark(running)))
            }
            PassPlan::Incremental { since, previous } => {
                let ViewData::RecentExecutions(window) = &previous.data else {
                    return Err(mismatch(view));
                };
                let delta = self.delta(view, *since, previous).await?;
                let rows = merge_recent(window, delta.executions, limit);
                Ok((ViewData::RecentExecutions(rows), watermark(delta.running)))
            }
        }
    }

    /// Alerts are always evaluated over their trailing windows, whatever
    /// the scope, so both plans do the same work. The aggregator carries
    /// alert identity over from the published snapshot.
    async fn performance_alerts(
        &self,
        plan: &PassPlan,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<(ViewData, PassWatermark)> {
        let view = ViewName::PerformanceAlerts;
        let rules = self.evaluator.config();
        if let PassPlan::Incremental { previous, .. } = plan {
            if !matches!(previous.data, ViewData::PerformanceAlerts(_)) {
                return Err(mismatch(view));
            }
        }

        let evaluation_start = now - rules.evaluation_window();
        let recent: Vec<ReportExecution> = self
            .scan(
                view,
                &ExecutionFilter::default()
                    .within(TimeRange::since(evaluation_start))
                    .terminal_only(),
            )
            .await?;

        let rate_start = now - rules.failure_rate_window();
        let rate_window = if rate_start == evaluation_start {
            recent.clone()
        } else {
            self.scan(
                view,
                &ExecutionFilter::default()
                    .within(TimeRange::since(rate_start))
                    .terminal_only(),
            )
            .await?
        };
        let rate_folds = fold_by(&rate_window, |e| e.report_id);

        let baseline_range = TimeRange::new(now - rules.baseline_window(), evaluation_start);
        let mut baselines = HashMap::new();
        let reports: BTreeSet<Uuid> = recent.iter().map(|e| e.report_id).collect();
        for report_id in reports {
            let samples = self
                .store
                .duration_samples(&report_id, &baseline_range)
                .await?
                .into_iter()
                .map(|s| (s.duration_ms, s.execution_id))
                .collect();
            if let Some(stats) = DurationStats::from_samples(samples) {
                baselines.insert(report_id, stats.percentiles.p95);
            }
        }

        let alerts = self.evaluator.evaluate(
            &recent,
            &baselines,
            &rate_folds,
            crate::models::truncate_to_hour(rate_start),
            now,
        );
        Ok((ViewData::PerformanceAlerts(alerts), PassWatermark::default()))
    }

    async fn execution_trends(&self, plan: &PassPlan) -> AnalyticsResult<(ViewData, PassWatermark)> {
        let view = ViewName::ExecutionTrends;
        let width = self.config.trend_bucket_width();

        match plan {
            PassPlan::Full => {
                let (executions, running) = self.full_scan(view).await?;
                let folds = fold_by(&executions, |e| (e.report_id, bucket_start(e.start_time, width)));
                let mut rows = finalize(folds, |(report_id, start), fold| {
                    trend_row(*report_id, *start, width, &fold)
                });

                let reports: BTreeSet<Uuid> = rows.keys().map(|(id, _)| *id).collect();
                for report_id in reports {
                    refresh_trend_deltas(&mut rows, report_id, width);
                }

                Ok((ViewData::ExecutionTrends(rows), watermark(running)))
            }
            PassPlan::Incremental { since, previous } => {
                let ViewData::ExecutionTrends(previous_rows) = &previous.data else {
                    return Err(mismatch(view));
                };
                let delta = self.delta(view, *since, previous).await?;
                let affected: BTreeSet<(Uuid, DateTime<Utc>)> = delta
                    .terminal()
                    .map(|e| (e.report_id, bucket_start(e.start_time, width)))
                    .collect();

                let mut rows = previous_rows.clone();
                for (report_id, start) in &affected {
                    let filter = ExecutionFilter::for_report(*report_id)
                        .within(TimeRange::new(*start, *start + width));
                    let executions = self.scan(view, &filter).await?;
                    match trend_row(*report_id, *start, width, &GrainFold::from_executions(&executions)) {
                        Some(row) => rows.insert((*report_id, *start), row),
                        None => rows.remove(&(*report_id, *start)),
                    };
                }

                let reports: BTreeSet<Uuid> = affected.iter().map(|(id, _)| *id).collect();
                for report_id in reports {
                    refresh_trend_deltas(&mut rows, report_id, width);
                }

                Ok((ViewData::ExecutionTrends(rows), watermark(delta.running)))
            }
        }
    }
}

fn running_ids(executions: &[ReportExecution]) -> BTreeSet<Uuid> {
    executions
        .iter()
        .filter(|e| !e.is_terminal())
        .map(|e| e.id)
        .collect()
}

fn watermark(running: BTreeSet<Uuid>) -> PassWatermark {
    PassWatermark {
        running,
        ..Default::default()
    }
}

fn members_by(reports: &[Report], dimension: ReportDimension) -> BTreeMap<String, BTreeSet<Uuid>> {
    let mut members: BTreeMap<String, BTreeSet<Uuid>> = BTreeMap::new();
    for report in reports {
        members
            .entry(report.dimension(dimension).to_string())
            .or_default()
            .insert(report.id);
    }
    members
}

/// Recompute every delta of one report's buckets
fn refresh_trend_deltas(
    rows: &mut BTreeMap<(Uuid, DateTime<Utc>), TrendRow>,
    report_id: Uuid,
    width: chrono::Duration,
) {
    let range = (report_id, DateTime::<Utc>::MIN_UTC)..=(report_id, DateTime::<Utc>::MAX_UTC);
    let mut buckets: Vec<TrendRow> = rows.range(range).map(|(_, row)| row.clone()).collect();
    apply_trend_deltas(&mut buckets, width);
    for row in buckets {
        rows.insert((row.report_id, row.bucket_start), row);
    }
}

fn mismatch(view: ViewName) -> AnalyticsError {
    AnalyticsError::ComputeFailed {
        view,
        reason: "previous snapshot holds another view".to_string(),
    }
}
