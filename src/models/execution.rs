use crate::error::{AppError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// One run of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportExecution {
    /// Unique identifier
    pub id: Uuid,

    /// Report this run belongs to
    pub report_id: Uuid,

    /// When the run started
    pub start_time: DateTime<Utc>,

    /// When the run reached a terminal status
    pub end_time: Option<DateTime<Utc>>,

    /// `end_time - start_time`, present only once terminal
    pub duration_ms: Option<i64>,

    /// Current status
    pub status: ExecutionStatus,

    /// User that started the run
    pub started_by: String,

    /// Records handled by the run
    #[serde(default)]
    pub records_processed: u64,

    /// Failure detail reported by the runner
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ReportExecution {
    /// Record the start of a run.
    ///
    /// Timestamps are kept at millisecond precision, the resolution of the
    /// index keys.
    pub fn start(report_id: Uuid, started_by: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            report_id,
            start_time: start_time.trunc_subsecs(3),
            end_time: None,
            duration_ms: None,
            status: ExecutionStatus::Running,
            started_by: started_by.into(),
            records_processed: 0,
            error_message: None,
        }
    }

    /// Use a caller-supplied identifier
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Move a running execution to its terminal status.
    ///
    /// Only a running execution may transition, and only once.
    pub fn complete(
        &mut self,
        status: ExecutionStatus,
        end_time: DateTime<Utc>,
        records_processed: u64,
        error_message: Option<String>,
    ) -> Result<()> {
        let end_time = end_time.trunc_subsecs(3);
        if self.status.is_terminal() {
            return Err(AppError::InvalidStateTransition(format!(
                "execution {} is already {}",
                self.id, self.status
            )));
        }
        if !status.is_terminal() {
            return Err(AppError::InvalidStateTransition(format!(
                "execution {} cannot transition to {}",
                self.id, status
            )));
        }
        if end_time < self.start_time {
            return Err(AppError::Validation(format!(
                "end_time {} precedes start_time {}",
                end_time, self.start_time
            )));
        }

        self.status = status;
        self.end_time = Some(end_time);
        self.duration_ms = Some((end_time - self.start_time).num_milliseconds());
        self.records_processed = records_processed;
        self.error_message = error_message;
        Ok(())
    }

    /// Check if the execution reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the execution succeeded
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Verify the status/end-time/duration invariant.
    ///
    /// Returns the reason the record is malformed.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.started_by.trim().is_empty() {
            return Err("started_by is empty".to_string());
        }

        match self.status {
            ExecutionStatus::Running => {
                if self.end_time.is_some() {
                    return Err("running execution has an end_time".to_string());
                }
                if self.duration_ms.is_some() {
                    return Err("running execution has a duration".to_string());
                }
            }
            status => {
                let end_time = self
                    .end_time
                    .ok_or_else(|| format!("{} execution has no end_time", status))?;
                let duration = self
                    .duration_ms
                    .ok_or_else(|| format!("{} execution has no duration", status))?;
                if duration < 0 {
                    return Err(format!("negative duration {}ms", duration));
                }
                let derived = (end_time - self.start_time).num_milliseconds();
                if derived != duration {
                    return Err(format!(
                        "duration {}ms does not match end_time - start_time ({}ms)",
                        duration, derived
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Execution status
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    /// Success, error and cancelled are terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    /// Stable single-byte code used in index keys
    pub fn code(&self) -> u8 {
        match self {
            ExecutionStatus::Running => 0,
            ExecutionStatus::Success => 1,
            ExecutionStatus::Error => 2,
            ExecutionStatus::Cancelled => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ExecutionStatus::Running),
            1 => Some(ExecutionStatus::Success),
            2 => Some(ExecutionStatus::Error),
            3 => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}
