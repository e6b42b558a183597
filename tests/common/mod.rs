//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use cmdb_report_analytics::{
    analytics::{Aggregator, AnalyticsConfig},
    clock::ManualClock,
    error::{AppError, Result},
    models::{ExecutionStatus, Report, ReportExecution, TimeRange},
    state::{
        DurationSample, ExecutionCompletion, ExecutionFilter, ExecutionLogStore, ExecutionPage,
        InMemoryStore, PageRequest, ReportFilter,
    },
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Fixed "now" the fixtures are built around
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 10, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

pub fn aggregator(store: Arc<dyn ExecutionLogStore>, clock: Arc<ManualClock>) -> Aggregator {
    aggregator_with(store, clock, AnalyticsConfig::default())
}

pub fn aggregator_with(
    store: Arc<dyn ExecutionLogStore>,
    clock: Arc<ManualClock>,
    config: AnalyticsConfig,
) -> Aggregator {
    Aggregator::builder(store)
        .clock(clock)
        .config(config)
        .build()
        .expect("aggregator")
}

pub async fn seed_report(
    store: &dyn ExecutionLogStore,
    name: &str,
    category: &str,
    provider: &str,
) -> Report {
    let report = Report::new(name, "inventory", category, provider);
    store.save_report(&report).await.expect("save report");
    report
}

/// Append an execution and complete it `duration_ms` later
pub async fn record(
    store: &dyn ExecutionLogStore,
    report_id: Uuid,
    started_by: &str,
    start_time: DateTime<Utc>,
    duration_ms: i64,
    status: ExecutionStatus,
    records_processed: u64,
) -> ReportExecution {
    let execution = ReportExecution::start(report_id, started_by, start_time);
    store.append_execution(&execution).await.expect("append");
    store
        .complete_execution(
            &execution.id,
            &ExecutionCompletion {
                status,
                end_time: start_time + Duration::milliseconds(duration_ms),
                records_processed,
                error_message: (status == ExecutionStatus::Error).then(|| "timeout".to_string()),
            },
        )
        .await
        .expect("complete")
}

pub async fn start(
    store: &dyn ExecutionLogStore,
    report_id: Uuid,
    started_by: &str,
    start_time: DateTime<Utc>,
) -> ReportExecution {
    let execution = ReportExecution::start(report_id, started_by, start_time);
    store.append_execution(&execution).await.expect("append");
    execution
}

/// The five-execution scenario: durations 100..400 succeed, 5000 fails
pub async fn seed_scenario(
    store: &dyn ExecutionLogStore,
    report_id: Uuid,
    day_start: DateTime<Utc>,
) -> Vec<ReportExecution> {
    let mut executions = Vec::new();
    for (i, (duration, status)) in [
        (100, ExecutionStatus::Success),
        (200, ExecutionStatus::Success),
        (300, ExecutionStatus::Success),
        (400, ExecutionStatus::Success),
        (5000, ExecutionStatus::Error),
    ]
    .into_iter()
    .enumerate()
    {
        executions.push(
            record(
                store,
                report_id,
                "ivan",
                day_start + Duration::hours(i as i64 + 1),
                duration,
                status,
                10,
            )
            .await,
        );
    }
    executions
}

/// Store wrapper that can be switched to fail or slow down execution scans
#[derive(Clone, Default)]
pub struct ControlledStore {
    inner: InMemoryStore,
    failing: Arc<AtomicBool>,
    failing_baselines: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
    scans: Arc<AtomicUsize>,
}

impl ControlledStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only the duration-sample index, which alert baselines read
    pub fn set_failing_baselines(&self, failing: bool) {
        self.failing_baselines.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: std::time::Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Execution pages read so far
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::SourceUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionLogStore for ControlledStore {
    async fn save_report(&self, report: &Report) -> Result<()> {
        self.inner.save_report(report).await
    }

    async fn get_report(&self, id: &Uuid) -> Result<Option<Report>> {
        self.inner.get_report(id).await
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        self.gate().await?;
        self.inner.list_reports(filter).await
    }

    async fn delete_report(&self, id: &Uuid) -> Result<()> {
        self.inner.delete_report(id).await
    }

    async fn append_execution(&self, execution: &ReportExecution) -> Result<()> {
        self.inner.append_execution(execution).await
    }

    async fn complete_execution(
        &self,
        id: &Uuid,
        completion: &ExecutionCompletion,
    ) -> Result<ReportExecution> {
        self.inner.complete_execution(id, completion).await
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ReportExecution>> {
        self.inner.get_execution(id).await
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: &PageRequest,
    ) -> Result<ExecutionPage> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        self.inner.list_executions(filter, page).await
    }

    async fn count_executions(&self, filter: &ExecutionFilter) -> Result<u64> {
        self.inner.count_executions(filter).await
    }

    async fn duration_samples(
        &self,
        report_id: &Uuid,
        range: &TimeRange,
    ) -> Result<Vec<DurationSample>> {
        self.gate().await?;
        if self.failing_baselines.load(Ordering::SeqCst) {
            return Err(AppError::SourceUnavailable("sample index offline".to_string()));
        }
        self.inner.duration_samples(report_id, range).await
    }

    async fn records_processed(&self, report_id: &Uuid, range: &TimeRange) -> Result<u64> {
        self.inner.records_processed(report_id, range).await
    }
}

/// Parse the Prometheus text format into metric name -> sample lines
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics: HashMap<String, Vec<String>> = HashMap::new();

    for line in output.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let name = line
            .split(|c| c == '{' || c == ' ')
            .next()
            .unwrap_or_default()
            .to_string();
        metrics.entry(name).or_default().push(line.to_string());
    }

    metrics
}
