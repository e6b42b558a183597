use crate::error::{AppError, Result};
use crate::models::{Report, ReportExecution, TimeRange};
use crate::state::index;
use crate::state::keys::{report_dims_key, trailing_id, ExecutionKeys, IndexKind, ScanPlan};
use crate::state::{
    DurationSample, ExecutionCompletion, ExecutionFilter, ExecutionLogStore, ExecutionPage,
    PageRequest, ReportFilter,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use sled::{Db, IVec, Tree};
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Persistent execution log using the Sled embedded database
///
/// Rows live in the `reports` and `executions` trees keyed by id; each
/// secondary index is its own tree of value-less keys.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    reports_tree: Tree,
    executions_tree: Tree,
    start_status_tree: Tree,
    user_start_status_tree: Tree,
    report_start_duration_tree: Tree,
    report_start_records_tree: Tree,
    report_dims_tree: Tree,
    /// Serializes check-then-write sequences
    write_lock: Arc<Mutex<()>>,
}

impl SledStore {
    /// Open (or create) a store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            AppError::Database(format!("Failed to open Sled database: {}", e))
        })?;

        let open = |name: &str| {
            db.open_tree(name).map_err(|e| {
                AppError::Database(format!("Failed to open {} tree: {}", name, e))
            })
        };

        let store = Self {
            reports_tree: open("reports")?,
            executions_tree: open("executions")?,
            start_status_tree: open(IndexKind::StartStatus.tree_name())?,
            user_start_status_tree: open(IndexKind::UserStartStatus.tree_name())?,
            report_start_duration_tree: open(IndexKind::ReportStartDuration.tree_name())?,
            report_start_records_tree: open(IndexKind::ReportStartRecords.tree_name())?,
            report_dims_tree: open(IndexKind::ReportDims.tree_name())?,
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        };

        tracing::info!(path = ?path.as_ref(), "Initialized Sled store");
        Ok(store)
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| AppError::Database(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }

    /// Get database size in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        self.db
            .size_on_disk()
            .map_err(|e| AppError::Database(format!("Failed to get database size: {}", e)))
    }

    fn index_tree(&self, index: IndexKind) -> &Tree {
        match index {
            IndexKind::StartStatus => &self.start_status_tree,
            IndexKind::UserStartStatus => &self.user_start_status_tree,
            IndexKind::ReportStartDuration => &self.report_start_duration_tree,
            IndexKind::ReportStartRecords => &self.report_start_records_tree,
            IndexKind::ReportDims => &self.report_dims_tree,
        }
    }

    fn scan(
        &self,
        plan: &ScanPlan,
        after: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = Result<IVec>>> {
        let (lower, lower_key) = match after {
            Some(cursor) if cursor >= plan.lower.as_slice() => (Bound::Excluded(cursor), cursor),
            _ => (Bound::Included(plan.lower.as_slice()), plan.lower.as_slice()),
        };
        if lower_key >= plan.upper.as_slice() {
            return Box::new(std::iter::empty());
        }

        let iter = self
            .index_tree(plan.index)
            .range::<&[u8], _>((lower, Bound::Excluded(plan.upper.as_slice())))
            .map(|item| {
                item.map(|(key, _)| key).map_err(|e| {
                    AppError::Database(format!("Failed to scan index: {}", e))
                })
            });
        Box::new(iter)
    }

    fn read_report(&self, id: &Uuid) -> Result<Option<Report>> {
        let bytes = self
            .reports_tree
            .get(id.as_bytes())
            .map_err(|e| AppError::Database(format!("Failed to get report: {}", e)))?;
        bytes
            .map(|bytes| bincode::deserialize(&bytes).map_err(AppError::from))
            .transpose()
    }

    fn read_execution(&self, id: &Uuid) -> Result<Option<ReportExecution>> {
        let bytes = self
            .executions_tree
            .get(id.as_bytes())
            .map_err(|e| AppError::Database(format!("Failed to get execution: {}", e)))?;
        bytes
            .map(|bytes| bincode::deserialize(&bytes).map_err(AppError::from))
            .transpose()
    }

    fn write_execution(&self, execution: &ReportExecution) -> Result<()> {
        let value = bincode::serialize(execution)?;
        self.executions_tree
            .insert(execution.id.as_bytes(), value)
            .map_err(|e| AppError::Database(format!("Failed to save execution: {}", e)))?;
        Ok(())
    }

    fn insert_index_keys(&self, keys: &ExecutionKeys) -> Result<()> {
        for (index, key) in keys.entries() {
            self.index_tree(index)
                .insert(key, IVec::default())
                .map_err(|e| AppError::Database(format!("Failed to update index: {}", e)))?;
        }
        Ok(())
    }

    fn remove_index_keys(&self, keys: &ExecutionKeys) -> Result<()> {
        for (index, key) in keys.entries() {
            self.index_tree(index)
                .remove(key)
                .map_err(|e| AppError::Database(format!("Failed to update index: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionLogStore for SledStore {
    async fn save_report(&self, report: &Report) -> Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(previous) = self.read_report(&report.id)? {
            self.report_dims_tree
                .remove(report_dims_key(&previous))
                .map_err(|e| AppError::Database(format!("Failed to update index: {}", e)))?;
        }

        let value = bincode::serialize(report)?;
        self.reports_tree
            .insert(report.id.as_bytes(), value)
            .map_err(|e| AppError::Database(format!("Failed to save report: {}", e)))?;
        self.report_dims_tree
            .insert(report_dims_key(report), IVec::default())
            .map_err(|e| AppError::Database(format!("Failed to update index: {}", e)))?;

        tracing::debug!(report_id = %report.id, "Report saved to Sled");
        Ok(())
    }

    async fn get_report(&self, id: &Uuid) -> Result<Option<Report>> {
        self.read_report(id)
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        let plan = ScanPlan::for_reports(filter);
        let mut reports = Vec::new();

        for key in self.scan(&plan, None) {
            let key = key?;
            let Some(id) = trailing_id(&key) else {
                continue;
            };
            if let Some(report) = self.read_report(&id)? {
                if filter.matches(&report) {
                    reports.push(report);
                }
            }
        }

        Ok(reports)
    }

    async fn delete_report(&self, id: &Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();

        let report = self
            .read_report(id)?
            .ok_or_else(|| AppError::NotFound(format!("Report {} not found", id)))?;

        let referenced = self
            .report_start_duration_tree
            .scan_prefix(id.as_bytes())
            .next()
            .transpose()
            .map_err(|e| AppError::Database(format!("Failed to scan index: {}", e)))?
            .is_some();
        if referenced {
            return Err(AppError::Conflict(format!(
                "Report {} is referenced by executions",
                id
            )));
        }

        self.report_dims_tree
            .remove(report_dims_key(&report))
            .map_err(|e| AppError::Database(format!("Failed to update index: {}", e)))?;
        self.reports_tree
            .remove(id.as_bytes())
            .map_err(|e| AppError::Database(format!("Failed to delete report: {}", e)))?;

        tracing::debug!(report_id = %id, "Report deleted from Sled");
        Ok(())
    }

    async fn append_execution(&self, execution: &ReportExecution) -> Result<()> {
        let _guard = self.write_lock.lock();

        let report_exists = self
            .reports_tree
            .contains_key(execution.report_id.as_bytes())
            .map_err(|e| AppError::Database(format!("Failed to check report: {}", e)))?;
        if !report_exists {
            return Err(AppError::NotFound(format!(
                "Report {} not found",
                execution.report_id
            )));
        }

        let exists = self
            .executions_tree
            .contains_key(execution.id.as_bytes())
            .map_err(|e| AppError::Database(format!("Failed to check execution: {}", e)))?;
        if exists {
            return Err(AppError::Conflict(format!(
                "Execution {} already exists",
                execution.id
            )));
        }

        self.write_execution(execution)?;
        self.insert_index_keys(&ExecutionKeys::for_execution(execution))?;

        tracing::debug!(
            execution_id = %execution.id,
            report_id = %execution.report_id,
            "Execution appended to Sled"
        );
        Ok(())
    }

    async fn complete_execution(
        &self,
        id: &Uuid,
        completion: &ExecutionCompletion,
    ) -> Result<ReportExecution> {
        let _guard = self.write_lock.lock();

        let mut execution = self
            .read_execution(id)?
            .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", id)))?;
        let old_keys = ExecutionKeys::for_execution(&execution);

        execution.complete(
            completion.status,
            completion.end_time,
            completion.records_processed,
            completion.error_message.clone(),
        )?;

        // Readers skip keys that disagree with the row, so the old keys can go last
        self.insert_index_keys(&ExecutionKeys::for_execution(&execution))?;
        self.write_execution(&execution)?;
        self.remove_index_keys(&old_keys)?;

        tracing::debug!(execution_id = %id, status = %execution.status, "Execution completed in Sled");
        Ok(execution)
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ReportExecution>> {
        self.read_execution(id)
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: &PageRequest,
    ) -> Result<ExecutionPage> {
        let plan = ScanPlan::for_executions(filter);
        let after = page.after.as_ref().map(|cursor| cursor.0.as_slice());
        index::collect_page(&plan, self.scan(&plan, after), filter, page, |id| {
            self.read_execution(id)
        })
    }

    async fn count_executions(&self, filter: &ExecutionFilter) -> Result<u64> {
        let plan = ScanPlan::for_executions(filter);
        let page = index::collect_page(
            &plan,
            self.scan(&plan, None),
            filter,
            &PageRequest::first(usize::MAX),
            |id| self.read_execution(id),
        )?;
        Ok(page.executions.len() as u64)
    }

    async fn duration_samples(
        &self,
        report_id: &Uuid,
        range: &TimeRange,
    ) -> Result<Vec<DurationSample>> {
        let plan = ScanPlan::for_report(IndexKind::ReportStartDuration, report_id, range);
        index::duration_samples(self.scan(&plan, None))
    }

    async fn records_processed(&self, report_id: &Uuid, range: &TimeRange) -> Result<u64> {
        let plan = ScanPlan::for_report(IndexKind::ReportStartRecords, report_id, range);
        index::records_sum(self.scan(&plan, None))
    }
}
