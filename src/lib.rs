//! Materialized analytics for the network CMDB's report execution log.
//!
//! The service keeps eight derived views (per-report summaries, daily
//! metrics, provider and category performance, user activity, recent
//! executions, performance alerts and execution trends) computed from the
//! append-mostly execution log, and serves them with a bounded staleness.

pub mod analytics;
pub mod api;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod state;

pub use error::{AppError, Result};
