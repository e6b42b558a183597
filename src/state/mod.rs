pub mod cache;
pub mod factory;
pub mod index;
pub mod keys;
pub mod sled_store;
pub mod store;

pub use cache::*;
pub use factory::{create_in_memory_store, create_store};
pub use index::ExecutionIndex;
pub use sled_store::SledStore;
pub use store::InMemoryStore;

use crate::error::Result;
use crate::models::{ExecutionStatus, Report, ReportExecution, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable, append-mostly log of reports and their executions
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    /// Create or update a report definition
    async fn save_report(&self, report: &Report) -> Result<()>;

    /// Get a report by ID
    async fn get_report(&self, id: &Uuid) -> Result<Option<Report>>;

    /// List reports by classification, ordered by `(type, category, provider)`
    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>>;

    /// Delete a report no execution references
    async fn delete_report(&self, id: &Uuid) -> Result<()>;

    /// Append a new execution; the report must exist and the id must be unused
    async fn append_execution(&self, execution: &ReportExecution) -> Result<()>;

    /// Move a running execution to a terminal status
    async fn complete_execution(
        &self,
        id: &Uuid,
        completion: &ExecutionCompletion,
    ) -> Result<ReportExecution>;

    /// Get an execution by ID
    async fn get_execution(&self, id: &Uuid) -> Result<Option<ReportExecution>>;

    /// One page of executions matching the filter, ordered by start time
    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: &PageRequest,
    ) -> Result<ExecutionPage>;

    /// Count executions matching the filter
    async fn count_executions(&self, filter: &ExecutionFilter) -> Result<u64>;

    /// Terminal durations of a report, read from the duration index alone
    async fn duration_samples(
        &self,
        report_id: &Uuid,
        range: &TimeRange,
    ) -> Result<Vec<DurationSample>>;

    /// Sum of records processed by terminal executions of a report, read
    /// from the records index alone
    async fn records_processed(&self, report_id: &Uuid, range: &TimeRange) -> Result<u64>;
}

/// Filter for querying reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFilter {
    pub report_type: Option<String>,
    pub category: Option<String>,
    pub provider: Option<String>,
}

impl ReportFilter {
    pub fn matches(&self, report: &Report) -> bool {
        self.report_type
            .as_ref()
            .map_or(true, |t| &report.report_type == t)
            && self.category.as_ref().map_or(true, |c| &report.category == c)
            && self.provider.as_ref().map_or(true, |p| &report.provider == p)
    }
}

/// Filter for querying executions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub report_id: Option<Uuid>,
    pub started_by: Option<String>,
    pub time_range: TimeRange,
    /// Empty means any status
    pub statuses: Vec<ExecutionStatus>,
}

impl ExecutionFilter {
    pub fn for_report(report_id: Uuid) -> Self {
        Self {
            report_id: Some(report_id),
            ..Default::default()
        }
    }

    pub fn for_user(started_by: impl Into<String>) -> Self {
        Self {
            started_by: Some(started_by.into()),
            ..Default::default()
        }
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.time_range = range;
        self
    }

    /// Restrict to success, error and cancelled
    pub fn terminal_only(mut self) -> Self {
        self.statuses = vec![
            ExecutionStatus::Success,
            ExecutionStatus::Error,
            ExecutionStatus::Cancelled,
        ];
        self
    }

    pub fn matches_status(&self, status: ExecutionStatus) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&status)
    }

    pub fn matches(&self, execution: &ReportExecution) -> bool {
        self.report_id.map_or(true, |id| execution.report_id == id)
            && self
                .started_by
                .as_ref()
                .map_or(true, |user| &execution.started_by == user)
            && self.time_range.contains(execution.start_time)
            && self.matches_status(execution.status)
    }
}

/// Terminal transition of a running execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCompletion {
    pub status: ExecutionStatus,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub records_processed: u64,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Opaque resume position within an index scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor(pub Vec<u8>);

/// Keyset page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub after: Option<ScanCursor>,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            after: None,
            limit: limit.max(1),
        }
    }
}

/// One page of an execution scan
#[derive(Debug, Clone, Default)]
pub struct ExecutionPage {
    pub executions: Vec<ReportExecution>,
    /// Set when the scan stopped at the page limit
    pub next: Option<ScanCursor>,
}

/// A terminal duration as stored in the duration index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSample {
    pub execution_id: Uuid,
    pub duration_ms: i64,
}

/// Drain every page of a scan
pub async fn collect_executions(
    store: &dyn ExecutionLogStore,
    filter: &ExecutionFilter,
    page_size: usize,
) -> Result<Vec<ReportExecution>> {
    let mut executions = Vec::new();
    let mut page = PageRequest::first(page_size);

    loop {
        let batch = store.list_executions(filter, &page).await?;
        executions.extend(batch.executions);
        match batch.next {
            Some(cursor) => page.after = Some(cursor),
            None => break,
        }
    }

    Ok(executions)
}
