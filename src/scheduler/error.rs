//! Error types for the refresh scheduler

use crate::error::AppError;

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Failures of the periodic refresh machinery itself; failed recomputes
/// are reported per view in a `TickReport` instead
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Failed to start refresh scheduler: {0}")]
    StartupFailed(String),

    #[error("Failed to shut down refresh scheduler: {0}")]
    ShutdownFailed(String),

    #[error("Failed to register refresh tick: {0}")]
    JobCreationFailed(String),

    #[error("Invalid scheduler configuration: {0}")]
    ConfigurationError(String),
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ConfigurationError(msg) => AppError::Configuration(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}
