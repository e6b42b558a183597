use crate::error::Result;
use crate::models::Report;
use crate::state::ExecutionLogStore;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Read-through cache of report definitions
///
/// Reports are rarely mutated, so aggregation passes and the API resolve
/// them here instead of hitting the log store for every execution.
#[derive(Clone)]
pub struct ReportCache {
    store: Arc<dyn ExecutionLogStore>,
    cache: Cache<Uuid, Report>,
}

impl ReportCache {
    pub fn new(store: Arc<dyn ExecutionLogStore>, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { store, cache }
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<Report>> {
        if let Some(report) = self.cache.get(id).await {
            return Ok(Some(report));
        }

        let report = self.store.get_report(id).await?;
        if let Some(ref report) = report {
            self.cache.insert(*id, report.clone()).await;
        }
        Ok(report)
    }

    /// Seed the cache from a listing the caller already made
    pub async fn prime(&self, reports: &[Report]) {
        for report in reports {
            self.cache.insert(report.id, report.clone()).await;
        }
    }

    pub async fn invalidate(&self, id: &Uuid) {
        self.cache.invalidate(id).await;
    }
}
