//! Configuration for the refresh scheduler

use crate::analytics::ViewName;
use crate::scheduler::error::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Configuration for the refresh scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the periodic tick runs
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval between staleness checks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Interval between full recomputes of every view
    #[serde(default = "default_full_refresh_interval_secs")]
    pub full_refresh_interval_secs: u64,

    /// How long a force-fresh read waits before serving the stale snapshot
    #[serde(default = "default_force_fresh_timeout_ms")]
    pub force_fresh_timeout_ms: u64,

    /// First retry delay after the execution log was unavailable
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound of the retry delay
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Staleness bound of views without an override
    #[serde(default = "default_max_staleness_secs")]
    pub default_max_staleness_secs: u64,

    /// Per-view staleness bounds
    #[serde(default = "default_view_staleness")]
    pub max_staleness_secs: BTreeMap<ViewName, u64>,
}

fn default_enabled() -> bool {
    true
}

fn default_tick_interval_secs() -> u64 {
    15
}

fn default_full_refresh_interval_secs() -> u64 {
    3600
}

fn default_force_fresh_timeout_ms() -> u64 {
    5000
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_max_staleness_secs() -> u64 {
    900 // 15 minutes
}

fn default_view_staleness() -> BTreeMap<ViewName, u64> {
    BTreeMap::from([
        (ViewName::RecentExecutions, 60),
        (ViewName::PerformanceAlerts, 60),
    ])
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            tick_interval_secs: default_tick_interval_secs(),
            full_refresh_interval_secs: default_full_refresh_interval_secs(),
            force_fresh_timeout_ms: default_force_fresh_timeout_ms(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            default_max_staleness_secs: default_max_staleness_secs(),
            max_staleness_secs: default_view_staleness(),
        }
    }
}

impl SchedulerConfig {
    /// Staleness bound of a view
    pub fn max_staleness(&self, view: ViewName) -> chrono::Duration {
        let secs = self
            .max_staleness_secs
            .get(&view)
            .copied()
            .unwrap_or(self.default_max_staleness_secs);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn full_refresh_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.full_refresh_interval_secs as i64)
    }

    pub fn force_fresh_timeout(&self) -> Duration {
        Duration::from_millis(self.force_fresh_timeout_ms)
    }

    /// Retry delay after `failures` consecutive source failures
    pub fn backoff_delay(&self, failures: u32) -> chrono::Duration {
        let exponent = failures.saturating_sub(1).min(32);
        let delay = self
            .backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_secs);
        chrono::Duration::seconds(delay as i64)
    }

    /// Validate configuration
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.tick_interval_secs == 0 {
            return Err(SchedulerError::ConfigurationError(
                "tick_interval_secs must be positive".to_string(),
            ));
        }
        if self.backoff_base_secs == 0 || self.backoff_max_secs < self.backoff_base_secs {
            return Err(SchedulerError::ConfigurationError(
                "backoff must satisfy 0 < base <= max".to_string(),
            ));
        }
        if self.force_fresh_timeout_ms == 0 {
            return Err(SchedulerError::ConfigurationError(
                "force_fresh_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for SchedulerConfig
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn tick_interval_secs(mut self, secs: u64) -> Self {
        self.config.tick_interval_secs = secs;
        self
    }

    pub fn full_refresh_interval_secs(mut self, secs: u64) -> Self {
        self.config.full_refresh_interval_secs = secs;
        self
    }

    pub fn force_fresh_timeout(mut self, timeout: Duration) -> Self {
        self.config.force_fresh_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn backoff(mut self, base_secs: u64, max_secs: u64) -> Self {
        self.config.backoff_base_secs = base_secs;
        self.config.backoff_max_secs = max_secs;
        self
    }

    pub fn max_staleness(mut self, view: ViewName, secs: u64) -> Self {
        self.config.max_staleness_secs.insert(view, secs);
        self
    }

    pub fn default_max_staleness(mut self, secs: u64) -> Self {
        self.config.default_max_staleness_secs = secs;
        self
    }

    pub fn build(self) -> SchedulerResult<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
