//! The eight materialized views, their rows and snapshots

use crate::analytics::alerts::{AlertKey, AlertType, PerformanceAlert};
use crate::models::{ExecutionStatus, ReportExecution};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Name of a view; each view is its own refresh family
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
pub enum ViewName {
    ReportsSummary,
    DailyExecutionMetrics,
    ProviderPerformance,
    CategoryPerformance,
    UserActivity,
    RecentExecutions,
    PerformanceAlerts,
    ExecutionTrends,
}

impl ViewName {
    pub const ALL: [ViewName; 8] = [
        ViewName::ReportsSummary,
        ViewName::DailyExecutionMetrics,
        ViewName::ProviderPerformance,
        ViewName::CategoryPerformance,
        ViewName::UserActivity,
        ViewName::RecentExecutions,
        ViewName::PerformanceAlerts,
        ViewName::ExecutionTrends,
    ];
}

/// `reports_summary`, one row per report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummaryRow {
    pub report_id: Uuid,
    pub name: String,
    pub report_type: String,
    pub category: String,
    pub provider: String,
    pub total_executions: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub cancelled_count: u64,
    pub success_rate: Option<f64>,
    pub avg_duration_ms: Option<f64>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<ExecutionStatus>,
    pub records_processed: u64,
}

/// `daily_execution_metrics`, one row per report and UTC day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricsRow {
    pub report_id: Uuid,
    pub day: NaiveDate,
    pub execution_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub cancelled_count: u64,
    pub success_rate: Option<f64>,
    pub avg_duration_ms: f64,
    pub min_duration_ms: i64,
    pub max_duration_ms: i64,
    pub p50_duration_ms: f64,
    pub p90_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
    pub records_processed: u64,
}

/// `provider_performance` / `category_performance`, one row per dimension value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionPerformanceRow {
    pub dimension: String,
    pub report_count: u64,
    pub execution_count: u64,
    pub success_count: u64,
    pub success_rate: Option<f64>,
    pub avg_duration_ms: Option<f64>,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
    pub p50_duration_ms: Option<f64>,
    pub p95_duration_ms: Option<f64>,
}

/// `user_activity`, one row per `startedBy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivityRow {
    pub started_by: String,
    pub execution_count: u64,
    pub success_count: u64,
    pub success_rate: Option<f64>,
    pub avg_duration_ms: f64,
    pub records_processed: u64,
    pub last_used_at: DateTime<Utc>,
    pub distinct_reports: u64,
}

/// `execution_trends`, one row per report and time bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRow {
    pub report_id: Uuid,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    pub execution_count: u64,
    pub success_count: u64,
    pub success_rate: Option<f64>,
    pub avg_duration_ms: f64,
    pub count_delta: Option<i64>,
    pub avg_duration_delta_ms: Option<f64>,
    pub success_rate_delta: Option<f64>,
}

/// Rows of a view keyed by grain
#[derive(Debug, Clone, PartialEq)]
pub enum ViewData {
    ReportsSummary(BTreeMap<Uuid, ReportSummaryRow>),
    DailyExecutionMetrics(BTreeMap<(Uuid, NaiveDate), DailyMetricsRow>),
    ProviderPerformance(BTreeMap<String, DimensionPerformanceRow>),
    CategoryPerformance(BTreeMap<String, DimensionPerformanceRow>),
    UserActivity(BTreeMap<String, UserActivityRow>),
    /// Ordered by `(start_time desc, id desc)`
    RecentExecutions(Vec<ReportExecution>),
    PerformanceAlerts(BTreeMap<AlertKey, PerformanceAlert>),
    ExecutionTrends(BTreeMap<(Uuid, DateTime<Utc>), TrendRow>),
}

impl ViewData {
    pub fn view(&self) -> ViewName {
        match self {
            ViewData::ReportsSummary(_) => ViewName::ReportsSummary,
            ViewData::DailyExecutionMetrics(_) => ViewName::DailyExecutionMetrics,
            ViewData::ProviderPerformance(_) => ViewName::ProviderPerformance,
            ViewData::CategoryPerformance(_) => ViewName::CategoryPerformance,
            ViewData::UserActivity(_) => ViewName::UserActivity,
            ViewData::RecentExecutions(_) => ViewName::RecentExecutions,
            ViewData::PerformanceAlerts(_) => ViewName::PerformanceAlerts,
            ViewData::ExecutionTrends(_) => ViewName::ExecutionTrends,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ViewData::ReportsSummary(rows) => rows.len(),
            ViewData::DailyExecutionMetrics(rows) => rows.len(),
            ViewData::ProviderPerformance(rows) | ViewData::CategoryPerformance(rows) => rows.len(),
            ViewData::UserActivity(rows) => rows.len(),
            ViewData::RecentExecutions(rows) => rows.len(),
            ViewData::PerformanceAlerts(rows) => rows.len(),
            ViewData::ExecutionTrends(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows matching a filter, in grain order
    pub fn select(&self, filter: &ViewFilter) -> ViewRows {
        let in_range = |at: DateTime<Utc>| {
            filter.from.map_or(true, |from| at >= from) && filter.to.map_or(true, |to| at < to)
        };
        let limit = filter.limit.unwrap_or(usize::MAX);

        match self {
            ViewData::ReportsSummary(rows) => ViewRows::ReportsSummary(
                rows.values()
                    .filter(|r| filter.report_id.map_or(true, |id| r.report_id == id))
                    .filter(|r| eq_opt(&filter.report_type, &r.report_type))
                    .filter(|r| eq_opt(&filter.category, &r.category))
                    .filter(|r| eq_opt(&filter.provider, &r.provider))
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            ViewData::DailyExecutionMetrics(rows) => ViewRows::DailyExecutionMetrics(
                rows.values()
                    .filter(|r| filter.report_id.map_or(true, |id| r.report_id == id))
                    .filter(|r| in_range(day_start(r.day)))
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            ViewData::ProviderPerformance(rows) => ViewRows::DimensionPerformance(
                rows.values()
                    .filter(|r| eq_opt(&filter.provider, &r.dimension))
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            ViewData::CategoryPerformance(rows) => ViewRows::DimensionPerformance(
                rows.values()
                    .filter(|r| eq_opt(&filter.category, &r.dimension))
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            ViewData::UserActivity(rows) => ViewRows::UserActivity(
                rows.values()
                    .filter(|r| eq_opt(&filter.started_by, &r.started_by))
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            ViewData::RecentExecutions(rows) => ViewRows::RecentExecutions(
                rows.iter()
                    .filter(|e| filter.report_id.map_or(true, |id| e.report_id == id))
                    .filter(|e| eq_opt(&filter.started_by, &e.started_by))
                    .filter(|e| in_range(e.start_time))
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            ViewData::PerformanceAlerts(rows) => ViewRows::PerformanceAlerts(
                rows.values()
                    .filter(|a| filter.report_id.map_or(true, |id| a.report_id == id))
                    .filter(|a| filter.alert_type.map_or(true, |t| a.alert_type == t))
                    .filter(|a| in_range(a.window_start))
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            ViewData::ExecutionTrends(rows) => ViewRows::ExecutionTrends(
                rows.values()
                    .filter(|r| filter.report_id.map_or(true, |id| r.report_id == id))
                    .filter(|r| in_range(r.bucket_start))
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
        }
    }

    /// Every row as `(grain key, row)`
    pub fn grain_rows(&self) -> serde_json::Result<Vec<(String, serde_json::Value)>> {
        fn encode<T: Serialize>(key: String, row: &T) -> serde_json::Result<(String, serde_json::Value)> {
            Ok((key, serde_json::to_value(row)?))
        }

        match self {
            ViewData::ReportsSummary(rows) => rows
                .iter()
                .map(|(id, row)| encode(id.to_string(), row))
                .collect(),
            ViewData::DailyExecutionMetrics(rows) => rows
                .iter()
                .map(|((id, day), row)| encode(format!("{}/{}", id, day), row))
                .collect(),
            ViewData::ProviderPerformance(rows) | ViewData::CategoryPerformance(rows) => rows
                .iter()
                .map(|(value, row)| encode(value.clone(), row))
                .collect(),
            ViewData::UserActivity(rows) => rows
                .iter()
                .map(|(user, row)| encode(user.clone(), row))
                .collect(),
            ViewData::RecentExecutions(rows) => rows
                .iter()
                .map(|exec| encode(exec.id.to_string(), exec))
                .collect(),
            ViewData::PerformanceAlerts(rows) => rows
                .values()
                .map(|alert| encode(alert.id.clone(), alert))
                .collect(),
            ViewData::ExecutionTrends(rows) => rows
                .iter()
                .map(|((id, bucket), row)| {
                    encode(format!("{}/{}", id, bucket.timestamp_millis()), row)
                })
                .collect(),
        }
    }

    /// Rebuild a view from rows produced by [`ViewData::grain_rows`]
    pub fn from_grain_rows(
        view: ViewName,
        rows: Vec<serde_json::Value>,
    ) -> serde_json::Result<Self> {
        fn decode<T: serde::de::DeserializeOwned>(
            rows: Vec<serde_json::Value>,
        ) -> serde_json::Result<Vec<T>> {
            rows.into_iter().map(serde_json::from_value).collect()
        }

        Ok(match view {
            ViewName::ReportsSummary => ViewData::ReportsSummary(
                decode::<ReportSummaryRow>(rows)?
                    .into_iter()
                    .map(|r| (r.report_id, r))
                    .collect(),
            ),
            ViewName::DailyExecutionMetrics => ViewData::DailyExecutionMetrics(
                decode::<DailyMetricsRow>(rows)?
                    .into_iter()
                    .map(|r| ((r.report_id, r.day), r))
                    .collect(),
            ),
            ViewName::ProviderPerformance => ViewData::ProviderPerformance(
                decode::<DimensionPerformanceRow>(rows)?
                    .into_iter()
                    .map(|r| (r.dimension.clone(), r))
                    .collect(),
            ),
            ViewName::CategoryPerformance => ViewData::CategoryPerformance(
                decode::<DimensionPerformanceRow>(rows)?
                    .into_iter()
                    .map(|r| (r.dimension.clone(), r))
                    .collect(),
            ),
            ViewName::UserActivity => ViewData::UserActivity(
                decode::<UserActivityRow>(rows)?
                    .into_iter()
                    .map(|r| (r.started_by.clone(), r))
                    .collect(),
            ),
            ViewName::RecentExecutions => {
                let mut rows = decode::<ReportExecution>(rows)?;
                rows.sort_by(recent_order);
                ViewData::RecentExecutions(rows)
            }
            ViewName::PerformanceAlerts => ViewData::PerformanceAlerts(
                decode::<PerformanceAlert>(rows)?
                    .into_iter()
                    .map(|a| (a.key(), a))
                    .collect(),
            ),
            ViewName::ExecutionTrends => ViewData::ExecutionTrends(
                decode::<TrendRow>(rows)?
                    .into_iter()
                    .map(|r| ((r.report_id, r.bucket_start), r))
                    .collect(),
            ),
        })
    }
}

/// `(start_time desc, id desc)`
pub fn recent_order(a: &ReportExecution, b: &ReportExecution) -> std::cmp::Ordering {
    b.start_time.cmp(&a.start_time).then_with(|| b.id.cmp(&a.id))
}

fn eq_opt(wanted: &Option<String>, actual: &str) -> bool {
    wanted.as_deref().map_or(true, |w| w == actual)
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Bookkeeping an incremental pass needs from the previous one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassWatermark {
    /// Executions that were still running; re-read by the next pass
    pub running: BTreeSet<Uuid>,
    /// Reports per dimension value, for the dimension views
    pub members: BTreeMap<String, BTreeSet<Uuid>>,
}

/// An immutable, published computation of one view
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub view: ViewName,
    /// Start of the pass that produced it; the staleness marker
    pub computed_at: DateTime<Utc>,
    pub data: ViewData,
    pub watermark: PassWatermark,
}

impl ViewSnapshot {
    pub fn new(computed_at: DateTime<Utc>, data: ViewData, watermark: PassWatermark) -> Self {
        Self {
            view: data.view(),
            computed_at,
            data,
            watermark,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.computed_at
    }
}

/// Filter accepted by `getView`; fields that do not apply to a view's grain are ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewFilter {
    pub report_id: Option<Uuid>,
    pub report_type: Option<String>,
    pub category: Option<String>,
    pub provider: Option<String>,
    pub started_by: Option<String>,
    pub alert_type: Option<AlertType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Selected rows of a view, serialized as a plain array
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ViewRows {
    ReportsSummary(Vec<ReportSummaryRow>),
    DailyExecutionMetrics(Vec<DailyMetricsRow>),
    DimensionPerformance(Vec<DimensionPerformanceRow>),
    UserActivity(Vec<UserActivityRow>),
    RecentExecutions(Vec<ReportExecution>),
    PerformanceAlerts(Vec<PerformanceAlert>),
    ExecutionTrends(Vec<TrendRow>),
}

impl ViewRows {
    pub fn len(&self) -> usize {
        match self {
            ViewRows::ReportsSummary(rows) => rows.len(),
            ViewRows::DailyExecutionMetrics(rows) => rows.len(),
            ViewRows::DimensionPerformance(rows) => rows.len(),
            ViewRows::UserActivity(rows) => rows.len(),
            ViewRows::RecentExecutions(rows) => rows.len(),
            ViewRows::PerformanceAlerts(rows) => rows.len(),
            ViewRows::ExecutionTrends(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
