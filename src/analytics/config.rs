//! Configuration for the analytics aggregator and alert evaluator

use crate::analytics::error::{AnalyticsError, AnalyticsResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Configuration for the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Size of the `recent_executions` window
    pub recent_window: usize,

    /// Width of an `execution_trends` bucket, in days
    pub trend_bucket_days: i64,

    /// Page size used when scanning the execution log
    pub scan_page_size: usize,

    /// Worker threads of the dedicated recompute runtime
    pub worker_threads: usize,

    /// An incremental pass starts this far before the previous `computedAt`
    /// to pick up rows appended while that pass was scanning
    pub incremental_overlap_secs: u64,

    /// Report metadata cache capacity
    pub report_cache_capacity: u64,

    /// Report metadata cache TTL
    pub report_cache_ttl_secs: u64,

    /// Thresholds for `performance_alerts`
    pub alerts: AlertConfig,
}

/// Thresholds for the alert evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Duration alert fires above `p95 * duration_multiplier`
    pub duration_multiplier: f64,

    /// Duration alert fires above this regardless of history
    pub duration_ceiling_ms: i64,

    /// Trailing window the p95 baseline is taken over
    pub baseline_window_days: i64,

    /// Executions started within this window are evaluated
    pub evaluation_window_hours: i64,

    /// Failure-rate alert fires below this success rate
    pub failure_rate_floor: f64,

    /// Window the success rate is measured over
    pub failure_rate_window_hours: i64,

    /// Terminal executions needed before a failure rate is judged
    pub failure_rate_min_executions: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            recent_window: 50,
            trend_bucket_days: 7,
            scan_page_size: 1000,
            worker_threads: 2,
            incremental_overlap_secs: 5,
            report_cache_capacity: 10_000,
            report_cache_ttl_secs: 300,
            alerts: AlertConfig::default(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            duration_multiplier: 2.0,
            duration_ceiling_ms: 30 * 60 * 1000, // 30 minutes
            baseline_window_days: 30,
            evaluation_window_hours: 24,
            failure_rate_floor: 0.8,
            failure_rate_window_hours: 24,
            failure_rate_min_executions: 1,
        }
    }
}

impl AnalyticsConfig {
    pub fn trend_bucket_width(&self) -> Duration {
        Duration::days(self.trend_bucket_days)
    }

    pub fn incremental_overlap(&self) -> Duration {
        Duration::seconds(self.incremental_overlap_secs as i64)
    }

    /// Validate configuration
    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.recent_window == 0 {
            return Err(AnalyticsError::InvalidConfiguration(
                "recent_window must be at least 1".to_string(),
            ));
        }
        if self.trend_bucket_days <= 0 {
            return Err(AnalyticsError::InvalidConfiguration(
                "trend_bucket_days must be positive".to_string(),
            ));
        }
        if self.scan_page_size == 0 {
            return Err(AnalyticsError::InvalidConfiguration(
                "scan_page_size must be at least 1".to_string(),
            ));
        }
        self.alerts.validate()
    }
}

impl AlertConfig {
    pub fn baseline_window(&self) -> Duration {
        Duration::days(self.baseline_window_days)
    }

    pub fn evaluation_window(&self) -> Duration {
        Duration::hours(self.evaluation_window_hours)
    }

    pub fn failure_rate_window(&self) -> Duration {
        Duration::hours(self.failure_rate_window_hours)
    }

    /// Validate configuration
    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.duration_multiplier.is_nan() || self.duration_multiplier <= 0.0 {
            return Err(AnalyticsError::InvalidConfiguration(
                "duration_multiplier must be positive".to_string(),
            ));
        }
        if self.duration_ceiling_ms <= 0 {
            return Err(AnalyticsError::InvalidConfiguration(
                "duration_ceiling_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_rate_floor) {
            return Err(AnalyticsError::InvalidConfiguration(format!(
                "failure_rate_floor must be within [0, 1], got {}",
                self.failure_rate_floor
            )));
        }
        if self.evaluation_window_hours <= 0
            || self.failure_rate_window_hours <= 0
            || self.baseline_window_days <= 0
        {
            return Err(AnalyticsError::InvalidConfiguration(
                "alert windows must be positive".to_string(),
            ));
        }
        if self.baseline_window() <= self.evaluation_window() {
            return Err(AnalyticsError::InvalidConfiguration(
                "baseline window must be longer than the evaluation window".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for AnalyticsConfig
pub struct AnalyticsConfigBuilder {
    config: AnalyticsConfig,
}

impl AnalyticsConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AnalyticsConfig::default(),
        }
    }

    pub fn recent_window(mut self, size: usize) -> Self {
        self.config.recent_window = size;
        self
    }

    pub fn trend_bucket_days(mut self, days: i64) -> Self {
        self.config.trend_bucket_days = days;
        self
    }

    pub fn scan_page_size(mut self, size: usize) -> Self {
        self.config.scan_page_size = size;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    pub fn incremental_overlap_secs(mut self, secs: u64) -> Self {
        self.config.incremental_overlap_secs = secs;
        self
    }

    pub fn duration_multiplier(mut self, multiplier: f64) -> Self {
        self.config.alerts.duration_multiplier = multiplier;
        self
    }

    pub fn duration_ceiling_ms(mut self, ceiling: i64) -> Self {
        self.config.alerts.duration_ceiling_ms = ceiling;
        self
    }

    pub fn failure_rate_floor(mut self, floor: f64) -> Self {
        self.config.alerts.failure_rate_floor = floor;
        self
    }

    pub fn failure_rate_min_executions(mut self, min: usize) -> Self {
        self.config.alerts.failure_rate_min_executions = min;
        self
    }

    pub fn build(self) -> AnalyticsResult<AnalyticsConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for AnalyticsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
