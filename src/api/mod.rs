pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::{
    analytics::Aggregator, catalog::ViewCatalog, scheduler::RefreshScheduler,
    state::ExecutionLogStore,
};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub catalog: ViewCatalog,
    pub store: Arc<dyn ExecutionLogStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(scheduler: Arc<RefreshScheduler>) -> Self {
        let store = scheduler.aggregator().store().clone();
        Self {
            catalog: ViewCatalog::new(scheduler),
            store,
            started_at: Instant::now(),
        }
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        self.catalog.scheduler()
    }

    pub fn aggregator(&self) -> &Aggregator {
        self.catalog.scheduler().aggregator()
    }
}
