use crate::error::{AppError, Result};
use crate::models::{Report, ReportExecution, TimeRange};
use crate::state::index::{self, ExecutionIndex};
use crate::state::keys::{report_dims_key, trailing_id, ExecutionKeys, IndexKind, ScanPlan};
use crate::state::{
    DurationSample, ExecutionCompletion, ExecutionFilter, ExecutionLogStore, ExecutionPage,
    PageRequest, ReportFilter,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory execution log (for development and testing)
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    reports: HashMap<Uuid, Report>,
    executions: HashMap<Uuid, ReportExecution>,
    index: ExecutionIndex,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLogStore for InMemoryStore {
    async fn save_report(&self, report: &Report) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if let Some(previous) = inner.reports.get(&report.id) {
            inner.index.remove_report(&report_dims_key(previous));
        }
        inner.index.insert_report(report_dims_key(report));
        inner.reports.insert(report.id, report.clone());

        tracing::debug!(report_id = %report.id, "Report saved");
        Ok(())
    }

    async fn get_report(&self, id: &Uuid) -> Result<Option<Report>> {
        Ok(self.inner.read().reports.get(id).cloned())
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        let inner = self.inner.read();
        let plan = ScanPlan::for_reports(filter);

        let reports = inner
            .index
            .scan(&plan, None)
            .filter_map(|key| trailing_id(key).and_then(|id| inner.reports.get(&id)))
            .filter(|report| filter.matches(report))
            .cloned()
            .collect();

        Ok(reports)
    }

    async fn delete_report(&self, id: &Uuid) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(report) = inner.reports.get(id) else {
            return Err(AppError::NotFound(format!("Report {} not found", id)));
        };

        let plan = ScanPlan::for_report(IndexKind::ReportStartDuration, id, &TimeRange::default());
        if inner.index.scan(&plan, None).next().is_some() {
            return Err(AppError::Conflict(format!(
                "Report {} is referenced by executions",
                id
            )));
        }

        inner.index.remove_report(&report_dims_key(report));
        inner.reports.remove(id);

        tracing::debug!(report_id = %id, "Report deleted");
        Ok(())
    }

    async fn append_execution(&self, execution: &ReportExecution) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.reports.contains_key(&execution.report_id) {
            return Err(AppError::NotFound(format!(
                "Report {} not found",
                execution.report_id
            )));
        }
        if inner.executions.contains_key(&execution.id) {
            return Err(AppError::Conflict(format!(
                "Execution {} already exists",
                execution.id
            )));
        }

        inner
            .index
            .insert_execution(&ExecutionKeys::for_execution(execution));
        inner.executions.insert(execution.id, execution.clone());

        tracing::debug!(
            execution_id = %execution.id,
            report_id = %execution.report_id,
            "Execution appended"
        );
        Ok(())
    }

    async fn complete_execution(
        &self,
        id: &Uuid,
        completion: &ExecutionCompletion,
    ) -> Result<ReportExecution> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let execution = inner
            .executions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", id)))?;

        let old_keys = ExecutionKeys::for_execution(execution);
        execution.complete(
            completion.status,
            completion.end_time,
            completion.records_processed,
            completion.error_message.clone(),
        )?;

        inner.index.remove_execution(&old_keys);
        inner
            .index
            .insert_execution(&ExecutionKeys::for_execution(execution));

        tracing::debug!(execution_id = %id, status = %execution.status, "Execution completed");
        Ok(execution.clone())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ReportExecution>> {
        Ok(self.inner.read().executions.get(id).cloned())
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: &PageRequest,
    ) -> Result<ExecutionPage> {
        let inner = self.inner.read();
        let plan = ScanPlan::for_executions(filter);
        let after = page.after.as_ref().map(|cursor| cursor.0.as_slice());

        index::collect_page(
            &plan,
            inner.index.scan(&plan, after).map(Ok),
            filter,
            page,
            |id| Ok(inner.executions.get(id).cloned()),
        )
    }

    async fn count_executions(&self, filter: &ExecutionFilter) -> Result<u64> {
        let inner = self.inner.read();
        let plan = ScanPlan::for_executions(filter);
        let page = index::collect_page(
            &plan,
            inner.index.scan(&plan, None).map(Ok),
            filter,
            &PageRequest::first(usize::MAX),
            |id| Ok(inner.executions.get(id).cloned()),
        )?;
        Ok(page.executions.len() as u64)
    }

    async fn duration_samples(
        &self,
        report_id: &Uuid,
        range: &TimeRange,
    ) -> Result<Vec<DurationSample>> {
        let inner = self.inner.read();
        let plan = ScanPlan::for_report(IndexKind::ReportStartDuration, report_id, range);
        index::duration_samples(inner.index.scan(&plan, None).map(Ok))
    }

    async fn records_processed(&self, report_id: &Uuid, range: &TimeRange) -> Result<u64> {
        let inner = self.inner.read();
        let plan = ScanPlan::for_report(IndexKind::ReportStartRecords, report_id, range);
        index::records_sum(inner.index.scan(&plan, None).map(Ok))
    }
}
