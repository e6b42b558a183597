//! The aggregator: owns the published snapshot of every view and runs
//! recompute passes on a dedicated runtime

use crate::analytics::alerts::carry_over;
use crate::analytics::compute::{ComputeContext, PassPlan};
use crate::analytics::config::AnalyticsConfig;
use crate::analytics::error::{AnalyticsError, AnalyticsResult, ViewFailure};
use crate::analytics::persistence::SnapshotRepository;
use crate::analytics::views::{ViewData, ViewName, ViewSnapshot};
use crate::clock::{system_clock, SharedClock};
use crate::error::Result;
use crate::metrics::{
    PERFORMANCE_ALERTS_ACTIVE, VIEW_RECOMPUTE_COALESCED_TOTAL, VIEW_RECOMPUTE_DURATION_SECONDS,
    VIEW_RECOMPUTE_SUPERSEDED_TOTAL, VIEW_RECOMPUTE_TOTAL, VIEW_ROWS,
};
use crate::models::Report;
use crate::state::ExecutionLogStore;
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use strum::IntoEnumIterator;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a recompute reads from the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum RecomputeScope {
    /// Rebuild from the entire log
    Full,
    /// Fold executions started at or after `since` into the current snapshot
    Incremental { since: DateTime<Utc> },
}

impl RecomputeScope {
    pub fn label(&self) -> &'static str {
        match self {
            RecomputeScope::Full => "full",
            RecomputeScope::Incremental { .. } => "incremental",
        }
    }

    /// Whether a pass of this scope answers a request for `other`
    pub fn covers(&self, other: &RecomputeScope) -> bool {
        match (self, other) {
            (RecomputeScope::Full, _) => true,
            (RecomputeScope::Incremental { since: a }, RecomputeScope::Incremental { since: b }) => {
                a <= b
            }
            (RecomputeScope::Incremental { .. }, RecomputeScope::Full) => false,
        }
    }
}

type PassResult = std::result::Result<Arc<ViewSnapshot>, AnalyticsError>;
type PassFuture = Shared<BoxFuture<'static, PassResult>>;

struct InFlight {
    id: u64,
    scope: RecomputeScope,
    future: PassFuture,
}

/// State of one view family
#[derive(Default)]
struct FamilySlot {
    snapshot: RwLock<Option<Arc<ViewSnapshot>>>,
    inflight: Mutex<Option<InFlight>>,
    passes: AtomicU64,
    last_error: RwLock<Option<AnalyticsError>>,
    /// `computedAt` of the last persisted copy; serializes writes per family
    persisted: tokio::sync::Mutex<Option<DateTime<Utc>>>,
}

struct Inner {
    ctx: ComputeContext,
    clock: SharedClock,
    runtime: Handle,
    repository: Option<Arc<dyn SnapshotRepository>>,
    families: BTreeMap<ViewName, FamilySlot>,
    next_pass: AtomicU64,
}

impl Inner {
    fn slot(&self, view: ViewName) -> &FamilySlot {
        // every view gets a slot at construction
        &self.families[&view]
    }
}

/// Outcome of a recompute over several view families
#[derive(Debug, Clone)]
pub struct RecomputeReport {
    pub scope: RecomputeScope,
    /// `computedAt` of each family that published
    pub computed: BTreeMap<ViewName, DateTime<Utc>>,
    pub failures: BTreeMap<ViewName, AnalyticsError>,
}

impl RecomputeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure_list(&self) -> Vec<ViewFailure> {
        self.failures
            .iter()
            .map(|(view, err)| ViewFailure {
                view: *view,
                reason: err.to_string(),
            })
            .collect()
    }

    /// Turn failures into an error.
    ///
    /// When nothing published and every family hit the source, the whole
    /// recompute counts as `SourceUnavailable`.
    pub fn ensure_complete(self) -> AnalyticsResult<Self> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        if self.computed.is_empty() {
            if let Some(err) = self.failures.values().find(|e| e.is_transient()) {
                if self.failures.values().all(|e| e.is_transient()) {
                    return Err(err.clone());
                }
            }
        }
        Err(AnalyticsError::PartialComputeFailure {
            failures: self.failure_list(),
        })
    }
}

/// Builder for [`Aggregator`]
pub struct AggregatorBuilder {
    store: Arc<dyn ExecutionLogStore>,
    config: AnalyticsConfig,
    clock: SharedClock,
    runtime: Option<Handle>,
    repository: Option<Arc<dyn SnapshotRepository>>,
}

impl AggregatorBuilder {
    pub fn config(mut self, config: AnalyticsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Runtime recompute passes are spawned on; defaults to the current one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Persist published snapshots and restore them on build
    pub fn repository(mut self, repository: Arc<dyn SnapshotRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn build(self) -> AnalyticsResult<Aggregator> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| {
                AnalyticsError::InvalidConfiguration(format!("no tokio runtime: {}", e))
            })?,
        };

        let families = ViewName::iter().map(|v| (v, FamilySlot::default())).collect();
        let aggregator = Aggregator {
            inner: Arc::new(Inner {
                ctx: ComputeContext::new(self.store, self.config),
                clock: self.clock,
                runtime,
                repository: self.repository,
                families,
                next_pass: AtomicU64::new(1),
            }),
        };
        aggregator.restore();

        Ok(aggregator)
    }
}

/// Computes the eight views and publishes them by atomic swap.
///
/// At most one pass per view family is in flight. A request whose scope the
/// in-flight pass covers joins it; any other request starts a new pass that
/// supersedes the old one, whose result is discarded.
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

impl Aggregator {
    pub fn builder(store: Arc<dyn ExecutionLogStore>) -> AggregatorBuilder {
        AggregatorBuilder {
            store,
            config: AnalyticsConfig::default(),
            clock: system_clock(),
            runtime: None,
            repository: None,
        }
    }

    /// Aggregator with default configuration on the current runtime
    pub fn new(store: Arc<dyn ExecutionLogStore>) -> AnalyticsResult<Self> {
        Self::builder(store).build()
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.inner.ctx.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }

    pub fn store(&self) -> &Arc<dyn ExecutionLogStore> {
        &self.inner.ctx.store
    }

    /// Report definition, read through the aggregator's metadata cache
    pub async fn report(&self, id: &Uuid) -> Result<Option<Report>> {
        self.inner.ctx.reports.get(id).await
    }

    /// Drop a cached report definition after it changed
    pub async fn invalidate_report(&self, id: &Uuid) {
        self.inner.ctx.reports.invalidate(id).await;
    }

    /// Latest published snapshot of a view
    pub fn snapshot(&self, view: ViewName) -> Option<Arc<ViewSnapshot>> {
        self.inner.slot(view).snapshot.read().clone()
    }

    /// Passes that ran to completion for a view, superseded ones included
    pub fn pass_count(&self, view: ViewName) -> u64 {
        self.inner.slot(view).passes.load(Ordering::SeqCst)
    }

    /// Error of the last failed pass, cleared by the next success
    pub fn last_error(&self, view: ViewName) -> Option<AnalyticsError> {
        self.inner.slot(view).last_error.read().clone()
    }

    pub fn is_in_flight(&self, view: ViewName) -> bool {
        self.inner.slot(view).inflight.lock().is_some()
    }

    /// Recompute every view family
    pub async fn recompute(&self, scope: RecomputeScope) -> RecomputeReport {
        self.recompute_views(&ViewName::ALL, scope).await
    }

    /// Recompute several view families concurrently; each one fails alone
    pub async fn recompute_views(&self, views: &[ViewName], scope: RecomputeScope) -> RecomputeReport {
        let results = join_all(views.iter().map(|view| self.recompute_view(*view, scope))).await;

        let mut report = RecomputeReport {
            scope,
            computed: BTreeMap::new(),
            failures: BTreeMap::new(),
        };
        for (view, result) in views.iter().zip(results) {
            match result {
                Ok(snapshot) => {
                    report.computed.insert(*view, snapshot.computed_at);
                }
                Err(err) => {
                    report.failures.insert(*view, err);
                }
            }
        }
        report
    }

    /// Recompute one view family, joining a covering pass already in flight
    pub async fn recompute_view(
        &self,
        view: ViewName,
        scope: RecomputeScope,
    ) -> AnalyticsResult<Arc<ViewSnapshot>> {
        loop {
            match self.join_or_start(view, scope).await {
                // the pass we waited on was replaced; wait on its successor
                Err(AnalyticsError::Superseded(_)) => continue,
                result => return result,
            }
        }
    }

    /// Start a pass in the background unless a covering one is in flight
    pub fn trigger(&self, view: ViewName, scope: RecomputeScope) {
        let _ = self.join_or_start(view, scope);
    }

    fn join_or_start(&self, view: ViewName, scope: RecomputeScope) -> PassFuture {
        let slot = self.inner.slot(view);
        let mut inflight = slot.inflight.lock();

        if let Some(current) = inflight.as_ref() {
            if current.scope.covers(&scope) {
                VIEW_RECOMPUTE_COALESCED_TOTAL
                    .with_label_values(&[&view.to_string()])
                    .inc();
                debug!(view = %view, pass = current.id, "Joining in-flight recompute");
                return current.future.clone();
            }
            VIEW_RECOMPUTE_SUPERSEDED_TOTAL
                .with_label_values(&[&view.to_string()])
                .inc();
            info!(
                view = %view,
                pass = current.id,
                scope = scope.label(),
                "Superseding in-flight recompute"
            );
        }

        let id = self.inner.next_pass.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        let handle = self
            .inner
            .runtime
            .spawn(async move { run_pass(inner, view, scope, id).await });

        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(AnalyticsError::ComputeFailed {
                    view,
                    reason: if e.is_panic() {
                        "recompute panicked".to_string()
                    } else {
                        "recompute task cancelled".to_string()
                    },
                }),
            }
        }
        .boxed()
        .shared();

        *inflight = Some(InFlight {
            id,
            scope,
            future: future.clone(),
        });
        future
    }

    /// Load persisted snapshots so reads after a restart are not cold
    fn restore(&self) {
        let Some(repository) = &self.inner.repository else {
            return;
        };

        for view in ViewName::iter() {
            match repository.load(view) {
                Ok(Some(snapshot)) => {
                    info!(view = %view, computed_at = %snapshot.computed_at, "Restored view snapshot");
                    record_rows(&snapshot);
                    let slot = self.inner.slot(view);
                    if let Ok(mut persisted) = slot.persisted.try_lock() {
                        *persisted = Some(snapshot.computed_at);
                    }
                    *slot.snapshot.write() = Some(Arc::new(snapshot));
                }
                Ok(None) => {}
                Err(e) => warn!(view = %view, error = %e, "Failed to restore view snapshot"),
            }
        }
    }
}

async fn run_pass(inner: Arc<Inner>, view: ViewName, scope: RecomputeScope, id: u64) -> PassResult {
    let slot = inner.slot(view);
    let now = inner.clock.now();
    let previous = slot.snapshot.read().clone();

    let plan = match (scope, previous.clone()) {
        (RecomputeScope::Incremental { since }, Some(previous)) => PassPlan::Incremental {
            since: since.min(previous.computed_at) - inner.ctx.config.incremental_overlap(),
            previous,
        },
        // nothing to fold into yet
        _ => PassPlan::Full,
    };
    let label = match plan {
        PassPlan::Full => "full",
        PassPlan::Incremental { .. } => "incremental",
    };

    let started = Instant::now();
    let result = inner
        .ctx
        .compute(view, plan, now)
        .await
        .map(|snapshot| keep_alert_identity(snapshot, previous.as_deref()));
    let elapsed = started.elapsed();
    slot.passes.fetch_add(1, Ordering::SeqCst);

    // the in-flight guard must not live across the persistence await
    let outcome = {
        let mut inflight = slot.inflight.lock();
        if inflight.as_ref().map(|f| f.id) != Some(id) {
            VIEW_RECOMPUTE_TOTAL
                .with_label_values(&[&view.to_string(), label, "superseded"])
                .inc();
            debug!(view = %view, pass = id, "Discarding superseded recompute");
            return Err(AnalyticsError::Superseded(view));
        }
        *inflight = None;

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let mut published = slot.snapshot.write();
                // computedAt never goes backwards within a family
                let newer = published
                    .as_ref()
                    .map_or(true, |p| snapshot.computed_at >= p.computed_at);
                if newer {
                    *published = Some(snapshot.clone());
                }
                *slot.last_error.write() = None;
                Ok((snapshot, newer))
            }
            Err(err) => {
                *slot.last_error.write() = Some(err.clone());
                Err(err)
            }
        }
    };

    VIEW_RECOMPUTE_DURATION_SECONDS
        .with_label_values(&[&view.to_string(), label])
        .observe(elapsed.as_secs_f64());

    match outcome {
        Ok((snapshot, published)) => {
            if published {
                if let Some(repository) = &inner.repository {
                    persist(slot, repository.clone(), snapshot.clone()).await;
                }
            }

            record_rows(&snapshot);
            VIEW_RECOMPUTE_TOTAL
                .with_label_values(&[&view.to_string(), label, "success"])
                .inc();
            info!(
                view = %view,
                scope = label,
                rows = snapshot.data.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Published view snapshot"
            );
            Ok(snapshot)
        }
        Err(err) => {
            VIEW_RECOMPUTE_TOTAL
                .with_label_values(&[&view.to_string(), label, "failure"])
                .inc();
            error!(view = %view, scope = label, error = %err, "View recompute failed");
            Err(err)
        }
    }
}

/// Write a published snapshot unless a newer copy is already persisted
async fn persist(slot: &FamilySlot, repository: Arc<dyn SnapshotRepository>, snapshot: Arc<ViewSnapshot>) {
    let view = snapshot.view;
    let mut persisted = slot.persisted.lock().await;
    if persisted.is_some_and(|at| at > snapshot.computed_at) {
        debug!(view = %view, "Skipping persistence of an older snapshot");
        return;
    }

    let computed_at = snapshot.computed_at;
    match tokio::task::spawn_blocking(move || repository.save(&snapshot)).await {
        Ok(Ok(())) => *persisted = Some(computed_at),
        Ok(Err(e)) => warn!(view = %view, error = %e, "Failed to persist view snapshot"),
        Err(e) => warn!(view = %view, error = %e, "Snapshot persistence task failed"),
    }
}

/// Alerts still active keep the id and `detected_at` of their first appearance
fn keep_alert_identity(mut snapshot: ViewSnapshot, previous: Option<&ViewSnapshot>) -> ViewSnapshot {
    if let (ViewData::PerformanceAlerts(next), Some(ViewData::PerformanceAlerts(before))) =
        (&mut snapshot.data, previous.map(|p| &p.data))
    {
        *next = carry_over(Some(before), std::mem::take(next));
    }
    snapshot
}

fn record_rows(snapshot: &ViewSnapshot) {
    VIEW_ROWS
        .with_label_values(&[&snapshot.view.to_string()])
        .set(snapshot.data.len() as i64);

    if let ViewData::PerformanceAlerts(alerts) = &snapshot.data {
        PERFORMANCE_ALERTS_ACTIVE.reset();
        for alert in alerts.values() {
            PERFORMANCE_ALERTS_ACTIVE
                .with_label_values(&[&alert.alert_type.to_string(), &alert.severity.to_string()])
                .inc();
        }
    }
}
