//! Materialized analytics over the report execution log
//!
//! This module computes the eight derived views the dashboard reads
//! instead of re-scanning raw execution history on every request.
//!
//! # Views
//!
//! - **reports_summary**: per report totals, success rate, last run, average duration
//! - **daily_execution_metrics**: per report and UTC day, with duration percentiles
//! - **provider_performance** / **category_performance**: per classification value
//! - **user_activity**: per `startedBy` user
//! - **recent_executions**: the last N executions, running ones included
//! - **performance_alerts**: duration and failure-rate alerts
//! - **execution_trends**: fixed-width buckets with deltas against the prior bucket
//!
//! Aggregates only count terminal executions. Incremental recomputes
//! re-scan the grains a delta touches, so they converge with a full
//! recompute over the same log.
//!
//! # Example
//!
//! ```no_run
//! use cmdb_report_analytics::analytics::{Aggregator, RecomputeScope, ViewName};
//! use cmdb_report_analytics::state::create_in_memory_store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let aggregator = Aggregator::new(create_in_memory_store())?;
//!
//!     aggregator.recompute(RecomputeScope::Full).await.ensure_complete()?;
//!     let summary = aggregator.snapshot(ViewName::ReportsSummary);
//!     println!("computed at {:?}", summary.map(|s| s.computed_at));
//!
//!     Ok(())
//! }
//! ```

mod aggregation;
mod alerts;
mod compute;
mod config;
mod engine;
mod error;
mod persistence;
mod statistics;
mod views;

pub use aggregation::{
    apply_trend_deltas, daily_row, dimension_row, merge_recent, summary_row, trend_row, user_row,
    GrainFold,
};
pub use alerts::{AlertEvaluator, AlertKey, AlertSeverity, AlertType, PerformanceAlert};
pub use compute::{ComputeContext, PassPlan};
pub use config::{AlertConfig, AnalyticsConfig, AnalyticsConfigBuilder};
pub use engine::{Aggregator, AggregatorBuilder, RecomputeReport, RecomputeScope};
pub use error::{AnalyticsError, AnalyticsResult, ViewFailure};
pub use persistence::{SledSnapshotRepository, SnapshotRepository};
pub use statistics::{mean, percentile, success_rate, DurationStats, Percentiles};
pub use views::{
    recent_order, DailyMetricsRow, DimensionPerformanceRow, PassWatermark, ReportSummaryRow,
    TrendRow, UserActivityRow, ViewData, ViewFilter, ViewName, ViewRows, ViewSnapshot,
};
