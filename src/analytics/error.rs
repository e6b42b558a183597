//! Error types for analytics operations

use crate::analytics::views::ViewName;
use crate::error::AppError;
use serde::Serialize;
use uuid::Uuid;

/// Result type for analytics operations
pub type AnalyticsResult<T> = std::result::Result<T, AnalyticsError>;

/// One view family that failed during a recompute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewFailure {
    pub view: ViewName,
    pub reason: String,
}

/// Errors that can occur in analytics operations
///
/// Cloneable so that every waiter on a coalesced pass receives the outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalyticsError {
    /// The execution log store could not be read; the previous snapshot stays
    #[error("Execution log unavailable: {0}")]
    SourceUnavailable(String),

    /// One or more view families failed while the others were published
    #[error("Recompute failed for {} view(s): {}", .failures.len(), describe(.failures))]
    PartialComputeFailure { failures: Vec<ViewFailure> },

    /// A malformed execution record, excluded from aggregation
    #[error("Invalid execution record {execution_id}: {reason}")]
    InvalidExecutionRecord { execution_id: Uuid, reason: String },

    /// A force-fresh read gave up waiting and fell back to the last snapshot
    #[error("Fresh read of {view} timed out after {waited_ms}ms")]
    StaleReadTimeout { view: ViewName, waited_ms: u64 },

    /// No snapshot of the view has been computed yet
    #[error("View {0} has not been computed yet")]
    NotYetComputed(ViewName),

    /// View name outside the catalog
    #[error("Unknown view: {0}")]
    UnknownView(String),

    /// A newer recompute replaced this one before it committed
    #[error("Recompute of {0} was superseded")]
    Superseded(ViewName),

    /// Computing a single view failed for a reason other than the source
    #[error("Computing {view} failed: {reason}")]
    ComputeFailed { view: ViewName, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl AnalyticsError {
    /// Failures worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalyticsError::SourceUnavailable(_))
    }
}

fn describe(failures: &[ViewFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.view, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<AppError> for AnalyticsError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(msg)
            | AppError::SourceUnavailable(msg)
            | AppError::Serialization(msg)
            | AppError::Internal(msg) => AnalyticsError::SourceUnavailable(msg),
            AppError::Io(e) => AnalyticsError::SourceUnavailable(e.to_string()),
            AppError::Timeout(msg) => AnalyticsError::SourceUnavailable(msg),
            AppError::Configuration(msg) => AnalyticsError::InvalidConfiguration(msg),
            other => AnalyticsError::SourceUnavailable(other.to_string()),
        }
    }
}

impl From<AnalyticsError> for AppError {
    fn from(err: AnalyticsError) -> Self {
        match err {
            AnalyticsError::SourceUnavailable(msg) => AppError::SourceUnavailable(msg),
            AnalyticsError::NotYetComputed(view) => AppError::NotYetComputed(view.to_string()),
            AnalyticsError::UnknownView(name) => {
                AppError::NotFound(format!("View {} not found", name))
            }
            AnalyticsError::InvalidExecutionRecord { .. } => AppError::Validation(err.to_string()),
            AnalyticsError::StaleReadTimeout { .. } => AppError::Timeout(err.to_string()),
            AnalyticsError::InvalidConfiguration(msg) => AppError::Configuration(msg),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
