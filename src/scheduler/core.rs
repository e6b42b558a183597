//! Refresh scheduler: staleness policy, backoff and the periodic tick

use super::{
    config::SchedulerConfig,
    error::{SchedulerError, SchedulerResult},
};
use crate::analytics::{
    Aggregator, AnalyticsError, AnalyticsResult, RecomputeScope, ViewName, ViewSnapshot,
};
use crate::metrics::{REFRESH_BACKOFF_TOTAL, STALE_READS_TOTAL, VIEW_STALENESS_SECONDS};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::{Display, EnumString};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

/// How a read treats a stale snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReadMode {
    /// Answer from the current snapshot and refresh in the background
    #[default]
    ServeStale,
    /// Wait for a recompute, up to the force-fresh timeout
    ForceFresh,
}

/// A snapshot handed to a reader, with its freshness
#[derive(Debug, Clone)]
pub struct ViewRead {
    pub snapshot: Arc<ViewSnapshot>,
    pub is_stale: bool,
    /// A background refresh was started by this read
    pub refresh_triggered: bool,
}

/// Retry state of a family whose last refresh hit an unavailable source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackoffState {
    pub failures: u32,
    pub next_attempt_at: DateTime<Utc>,
}

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub full: bool,
    pub refreshed: Vec<ViewName>,
    /// Due but still backing off
    pub deferred: Vec<ViewName>,
    pub failed: BTreeMap<ViewName, AnalyticsError>,
}

/// Decides when each view family is recomputed.
///
/// Every family carries its own staleness bound. Reads never block on a
/// stale snapshot unless they ask for [`ReadMode::ForceFresh`]; the
/// periodic tick refreshes whatever is due and runs a full recompute on
/// the reconcile interval.
pub struct RefreshScheduler {
    config: SchedulerConfig,
    aggregator: Aggregator,
    backoff: Arc<DashMap<ViewName, BackoffState>>,
    last_full: parking_lot::Mutex<Option<DateTime<Utc>>>,
    scheduler: tokio::sync::Mutex<Option<JobScheduler>>,
}

impl RefreshScheduler {
    pub fn new(aggregator: Aggregator, config: SchedulerConfig) -> SchedulerResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            aggregator,
            backoff: Arc::new(DashMap::new()),
            last_full: parking_lot::Mutex::new(None),
            scheduler: tokio::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    fn now(&self) -> DateTime<Utc> {
        self.aggregator.clock().now()
    }

    /// Whether a snapshot is past its family's staleness bound
    pub fn is_stale(&self, snapshot: &ViewSnapshot, now: DateTime<Utc>) -> bool {
        snapshot.age(now) > self.config.max_staleness(snapshot.view)
    }

    pub fn backoff_state(&self, view: ViewName) -> Option<BackoffState> {
        self.backoff.get(&view).map(|s| *s)
    }

    fn backing_off(&self, view: ViewName, now: DateTime<Utc>) -> bool {
        let deferred = self
            .backoff
            .get(&view)
            .is_some_and(|state| now < state.next_attempt_at);
        if deferred {
            REFRESH_BACKOFF_TOTAL
                .with_label_values(&[&view.to_string()])
                .inc();
        }
        deferred
    }

    fn record_outcome(
        &self,
        view: ViewName,
        result: &AnalyticsResult<Arc<ViewSnapshot>>,
        now: DateTime<Utc>,
    ) {
        record_outcome(&self.backoff, &self.config, view, result, now);
    }

    fn scope_for(&self, view: ViewName) -> RecomputeScope {
        match self.aggregator.snapshot(view) {
            Some(snapshot) => RecomputeScope::Incremental {
                since: snapshot.computed_at,
            },
            None => RecomputeScope::Full,
        }
    }

    /// Start a background refresh of a view unless it is backing off
    pub fn refresh_in_background(&self, view: ViewName) -> bool {
        let now = self.now();
        if self.backing_off(view, now) {
            debug!(view = %view, "Refresh deferred by backoff");
            return false;
        }

        let scope = self.scope_for(view);
        let aggregator = self.aggregator.clone();
        let backoff = self.backoff.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let result = aggregator.recompute_view(view, scope).await;
            record_outcome(&backoff, &config, view, &result, now);
        });
        true
    }

    /// Read a view under the staleness policy
    pub async fn read(&self, view: ViewName, mode: ReadMode) -> AnalyticsResult<ViewRead> {
        let now = self.now();

        let Some(snapshot) = self.aggregator.snapshot(view) else {
            return match mode {
                ReadMode::ServeStale => {
                    self.refresh_in_background(view);
                    Err(AnalyticsError::NotYetComputed(view))
                }
                ReadMode::ForceFresh => match self.wait_fresh(view, now).await {
                    Ok(snapshot) => Ok(ViewRead {
                        snapshot,
                        is_stale: false,
                        refresh_triggered: true,
                    }),
                    // no snapshot to fall back on; the outcome is already recorded
                    Err(err) => {
                        warn!(view = %view, error = %err, "Cold force-fresh read failed");
                        Err(AnalyticsError::NotYetComputed(view))
                    }
                },
            };
        };

        let stale = self.is_stale(&snapshot, now);
        match mode {
            ReadMode::ServeStale => {
                let refresh_triggered = stale && self.refresh_in_background(view);
                if stale {
                    STALE_READS_TOTAL
                        .with_label_values(&[&view.to_string(), &mode.to_string()])
                        .inc();
                }
                Ok(ViewRead {
                    snapshot,
                    is_stale: stale,
                    refresh_triggered,
                })
            }
            ReadMode::ForceFresh => match self.wait_fresh(view, now).await {
                Ok(fresh) => Ok(ViewRead {
                    snapshot: fresh,
                    is_stale: false,
                    refresh_triggered: true,
                }),
                Err(err) => {
                    warn!(view = %view, error = %err, "Serving last good snapshot");
                    STALE_READS_TOTAL
                        .with_label_values(&[&view.to_string(), &mode.to_string()])
                        .inc();
                    Ok(ViewRead {
                        snapshot: self.aggregator.snapshot(view).unwrap_or(snapshot),
                        is_stale: true,
                        refresh_triggered: true,
                    })
                }
            },
        }
    }

    /// Recompute and wait, up to the force-fresh timeout
    async fn wait_fresh(&self, view: ViewName, now: DateTime<Utc>) -> AnalyticsResult<Arc<ViewSnapshot>> {
        if self.backing_off(view, now) {
            return Err(AnalyticsError::SourceUnavailable(format!(
                "{} is backing off after source failures",
                view
            )));
        }

        let timeout = self.config.force_fresh_timeout();
        let scope = self.scope_for(view);
        match tokio::time::timeout(timeout, self.aggregator.recompute_view(view, scope)).await {
            Ok(result) => {
                self.record_outcome(view, &result, now);
                result
            }
            Err(_) => {
                // the pass keeps running and publishes when it finishes
                let err = AnalyticsError::StaleReadTimeout {
                    view,
                    waited_ms: timeout.as_millis() as u64,
                };
                warn!(view = %view, error = %err, "Force-fresh read timed out");
                Err(err)
            }
        }
    }

    /// Refresh every family that is cold, stale or due for a full reconcile
    pub async fn tick(&self) -> TickReport {
        let now = self.now();
        let full = {
            let mut last_full = self.last_full.lock();
            let due = last_full.map_or(true, |at| now - at >= self.config.full_refresh_interval());
            if due {
                *last_full = Some(now);
            }
            due
        };

        let mut report = TickReport {
            full,
            ..Default::default()
        };
        let mut due = Vec::new();
        for view in ViewName::ALL {
            let snapshot = self.aggregator.snapshot(view);
            if let Some(snapshot) = &snapshot {
                VIEW_STALENESS_SECONDS
                    .with_label_values(&[&view.to_string()])
                    .set(snapshot.age(now).num_milliseconds() as f64 / 1000.0);
            }

            let needed = full || snapshot.as_ref().map_or(true, |s| self.is_stale(s, now));
            if !needed {
                continue;
            }
            if self.backing_off(view, now) {
                report.deferred.push(view);
                continue;
            }

            let scope = if full {
                RecomputeScope::Full
            } else {
                self.scope_for(view)
            };
            due.push((view, scope));
        }

        let results = join_all(
            due.iter()
                .map(|(view, scope)| self.aggregator.recompute_view(*view, *scope)),
        )
        .await;

        for ((view, _), result) in due.into_iter().zip(results) {
            self.record_outcome(view, &result, now);
            match result {
                Ok(_) => report.refreshed.push(view),
                Err(err) => {
                    report.failed.insert(view, err);
                }
            }
        }

        debug!(
            full = report.full,
            refreshed = report.refreshed.len(),
            deferred = report.deferred.len(),
            failed = report.failed.len(),
            "Scheduler tick finished"
        );
        report
    }

    /// Start the periodic tick
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        if !self.config.enabled {
            info!("Refresh scheduler is disabled in configuration");
            return Ok(());
        }

        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            warn!("Refresh scheduler is already running");
            return Ok(());
        }

        info!(
            tick_secs = self.config.tick_interval_secs,
            full_refresh_secs = self.config.full_refresh_interval_secs,
            "Starting refresh scheduler"
        );

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::StartupFailed(e.to_string()))?;

        let this = self.clone();
        let job = Job::new_repeated_async(self.config.tick_interval(), move |_uuid, _l| {
            let this = this.clone();
            Box::pin(async move {
                let report = this.tick().await;
                for (view, err) in &report.failed {
                    error!(view = %view, error = %err, "Scheduled refresh failed");
                }
            })
        })
        .map_err(|e| SchedulerError::JobCreationFailed(e.to_string()))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobCreationFailed(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::StartupFailed(e.to_string()))?;
        *guard = Some(scheduler);

        // warm every view without waiting for the first interval
        let this = self.clone();
        tokio::spawn(async move {
            this.tick().await;
        });

        info!("Refresh scheduler started successfully");
        Ok(())
    }

    /// Stop the periodic tick
    pub async fn shutdown(&self) -> SchedulerResult<()> {
        let Some(mut scheduler) = self.scheduler.lock().await.take() else {
            warn!("Refresh scheduler is not running");
            return Ok(());
        };

        info!("Shutting down refresh scheduler");
        scheduler
            .shutdown()
            .await
            .map_err(|e| SchedulerError::ShutdownFailed(e.to_string()))?;
        info!("Refresh scheduler shut down successfully");

        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }
}

fn record_outcome(
    backoff: &DashMap<ViewName, BackoffState>,
    config: &SchedulerConfig,
    view: ViewName,
    result: &AnalyticsResult<Arc<ViewSnapshot>>,
    now: DateTime<Utc>,
) {
    match result {
        Ok(_) => {
            if backoff.remove(&view).is_some() {
                info!(view = %view, "Source recovered, backoff cleared");
            }
        }
        Err(err) if err.is_transient() => {
            let mut state = backoff.entry(view).or_insert(BackoffState {
                failures: 0,
                next_attempt_at: now,
            });
            state.failures += 1;
            state.next_attempt_at = now + config.backoff_delay(state.failures);
            warn!(
                view = %view,
                failures = state.failures,
                retry_at = %state.next_attempt_at,
                error = %err,
                "Refresh failed, backing off"
            );
        }
        Err(err) => {
            error!(view = %view, error = %err, "Refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::InMemoryStore;
    use chrono::{Duration, TimeZone};

    fn scheduler(clock: Arc<ManualClock>) -> RefreshScheduler {
        let aggregator = Aggregator::builder(Arc::new(InMemoryStore::new()))
            .clock(clock)
            .build()
            .unwrap();
        RefreshScheduler::new(aggregator, SchedulerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_cold_read_reports_not_yet_computed() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()));
        let scheduler = scheduler(clock);

        let err = scheduler
            .read(ViewName::UserActivity, ReadMode::ServeStale)
            .await
            .unwrap_err();
        assert_eq!(err, AnalyticsError::NotYetComputed(ViewName::UserActivity));
    }

    #[tokio::test]
    async fn test_first_tick_is_full_and_fills_every_view() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()));
        let scheduler = scheduler(clock.clone());

        let report = scheduler.tick().await;
        assert!(report.full);
        assert_eq!(report.refreshed.len(), 8);

        // nothing is stale a moment later
        clock.advance(Duration::seconds(10));
        let report = scheduler.tick().await;
        assert!(!report.full);
        assert!(report.refreshed.is_empty());

        // recent_executions and performance_alerts go stale after a minute
        clock.advance(Duration::seconds(61));
        let report = scheduler.tick().await;
        assert_eq!(
            report.refreshed,
            vec![ViewName::RecentExecutions, ViewName::PerformanceAlerts]
        );
    }

    #[tokio::test]
    async fn test_staleness_flag() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()));
        let scheduler = scheduler(clock.clone());
        scheduler.tick().await;

        let read = scheduler
            .read(ViewName::ReportsSummary, ReadMode::ServeStale)
            .await
            .unwrap();
        assert!(!read.is_stale);
        assert!(!read.refresh_triggered);

        clock.advance(Duration::minutes(15) + Duration::milliseconds(1));
        let read = scheduler
            .read(ViewName::ReportsSummary, ReadMode::ServeStale)
            .await
            .unwrap();
        assert!(read.is_stale);
        assert!(read.refresh_triggered);
    }
}
