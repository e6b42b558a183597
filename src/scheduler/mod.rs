//! Refresh scheduling for the derived views
//!
//! Each view family has a staleness bound. A periodic tick (driven by
//! tokio-cron-scheduler) refreshes the families that went stale, and on a
//! longer interval runs a full recompute that reconciles late-arriving
//! executions. Reads are served from the last snapshot; a stale read kicks
//! off a background refresh, and a force-fresh read waits for one up to a
//! timeout. Families whose source failed back off exponentially.
//!
//! # Example
//!
//! ```no_run
//! use cmdb_report_analytics::analytics::{Aggregator, ViewName};
//! use cmdb_report_analytics::scheduler::{ReadMode, RefreshScheduler, SchedulerConfig};
//! use cmdb_report_analytics::state::create_in_memory_store;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let aggregator = Aggregator::new(create_in_memory_store())?;
//!     let scheduler = Arc::new(RefreshScheduler::new(aggregator, SchedulerConfig::default())?);
//!
//!     scheduler.start().await?;
//!     let read = scheduler.read(ViewName::UserActivity, ReadMode::ServeStale).await;
//!     println!("{:?}", read.map(|r| r.is_stale));
//!
//!     scheduler.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use core::{BackoffState, ReadMode, RefreshScheduler, TickReport, ViewRead};
pub use error::{SchedulerError, SchedulerResult};
