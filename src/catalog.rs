//! The read surface over the eight views

use crate::analytics::{AnalyticsError, AnalyticsResult, ViewFilter, ViewName, ViewRows};
use crate::scheduler::{ReadMode, RefreshScheduler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// A filtered view snapshot with its freshness
#[derive(Debug, Clone, Serialize)]
pub struct ViewResponse {
    pub view: ViewName,
    pub computed_at: DateTime<Utc>,
    pub is_stale: bool,
    pub rows: ViewRows,
}

/// Freshness overview of one view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewStatus {
    pub view: ViewName,
    pub computed_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub rows: usize,
    pub max_staleness_secs: i64,
    pub in_flight: bool,
    pub last_error: Option<String>,
}

/// Looks views up by name and applies grain filters
#[derive(Clone)]
pub struct ViewCatalog {
    scheduler: Arc<RefreshScheduler>,
}

impl ViewCatalog {
    pub fn new(scheduler: Arc<RefreshScheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    /// Resolve a view name
    pub fn resolve(name: &str) -> AnalyticsResult<ViewName> {
        ViewName::from_str(name).map_err(|_| AnalyticsError::UnknownView(name.to_string()))
    }

    /// Filtered rows of a view, served under the staleness policy
    pub async fn get_view(
        &self,
        name: &str,
        filter: &ViewFilter,
        mode: ReadMode,
    ) -> AnalyticsResult<ViewResponse> {
        let view = Self::resolve(name)?;
        let read = self.scheduler.read(view, mode).await?;

        Ok(ViewResponse {
            view,
            computed_at: read.snapshot.computed_at,
            is_stale: read.is_stale,
            rows: read.snapshot.data.select(filter),
        })
    }

    pub fn list_views(&self) -> Vec<ViewStatus> {
        let aggregator = self.scheduler.aggregator();
        let now = aggregator.clock().now();

        ViewName::ALL
            .into_iter()
            .map(|view| {
                let snapshot = aggregator.snapshot(view);
                ViewStatus {
                    view,
                    computed_at: snapshot.as_ref().map(|s| s.computed_at),
                    is_stale: snapshot
                        .as_ref()
                        .map_or(true, |s| self.scheduler.is_stale(s, now)),
                    rows: snapshot.as_ref().map_or(0, |s| s.data.len()),
                    max_staleness_secs: self.scheduler.config().max_staleness(view).num_seconds(),
                    in_flight: aggregator.is_in_flight(view),
                    last_error: aggregator.last_error(view).map(|e| e.to_string()),
                }
            })
            .collect()
    }
}
