use crate::analytics::{AlertType, RecomputeScope, ViewFilter, ViewName};
use crate::api::AppState;
use crate::catalog::{ViewResponse, ViewStatus};
use crate::error::{AppError, Result};
use crate::metrics::gather_metrics;
use crate::models::*;
use crate::scheduler::ReadMode;
use crate::state::{
    ExecutionCompletion, ExecutionFilter, PageRequest, ReportFilter, ScanCursor,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Ready once every view has a first snapshot
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let pending: Vec<ViewName> = ViewName::ALL
        .into_iter()
        .filter(|view| state.aggregator().snapshot(*view).is_none())
        .collect();

    let status = if pending.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "pending_views": pending })))
}

/// Prometheus text exposition
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Freshness of every view
pub async fn list_views(State(state): State<AppState>) -> Json<Vec<ViewStatus>> {
    Json(state.catalog.list_views())
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    pub report_id: Option<Uuid>,
    pub report_type: Option<String>,
    pub category: Option<String>,
    pub provider: Option<String>,
    pub started_by: Option<String>,
    pub alert_type: Option<AlertType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    /// Wait for a recompute instead of serving a stale snapshot
    #[serde(default)]
    pub fresh: bool,
}

impl ViewQuery {
    fn mode(&self) -> ReadMode {
        if self.fresh {
            ReadMode::ForceFresh
        } else {
            ReadMode::ServeStale
        }
    }

    fn into_filter(self) -> ViewFilter {
        ViewFilter {
            report_id: self.report_id,
            report_type: self.report_type,
            category: self.category,
            provider: self.provider,
            started_by: self.started_by,
            alert_type: self.alert_type,
            from: self.from,
            to: self.to,
            limit: self.limit,
        }
    }
}

/// Filtered snapshot of one view
pub async fn get_view(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<ViewResponse>> {
    let mode = query.mode();
    let filter = query.into_filter();
    let response = state.catalog.get_view(&name, &filter, mode).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct RecomputeRequest {
    #[serde(flatten)]
    pub scope: RecomputeScope,
    /// All views when absent
    #[serde(default)]
    pub views: Option<Vec<ViewName>>,
    /// Wait for the passes to finish
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecomputeResponse {
    pub scope: RecomputeScope,
    pub computed: BTreeMap<ViewName, DateTime<Utc>>,
    pub failures: BTreeMap<ViewName, String>,
    /// Passes started in the background without waiting
    pub triggered: Vec<ViewName>,
}

/// Trigger a recompute
pub async fn recompute_views(
    State(state): State<AppState>,
    Json(request): Json<RecomputeRequest>,
) -> Result<(StatusCode, Json<RecomputeResponse>)> {
    let views = request.views.unwrap_or_else(|| ViewName::ALL.to_vec());
    let aggregator = state.aggregator();

    if !request.wait {
        for view in &views {
            aggregator.trigger(*view, request.scope);
        }
        return Ok((
            StatusCode::ACCEPTED,
            Json(RecomputeResponse {
                scope: request.scope,
                computed: BTreeMap::new(),
                failures: BTreeMap::new(),
                triggered: views,
            }),
        ));
    }

    let report = aggregator.recompute_views(&views, request.scope).await;
    let status = if report.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((
        status,
        Json(RecomputeResponse {
            scope: report.scope,
            computed: report.computed,
            failures: report
                .failures
                .into_iter()
                .map(|(view, err)| (view, err.to_string()))
                .collect(),
            triggered: Vec::new(),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct SaveReportRequest {
    pub id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub report_type: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[validate(length(min = 1, max = 100))]
    pub provider: String,
}

/// Create or update a report definition
pub async fn save_report(
    State(state): State<AppState>,
    Json(request): Json<SaveReportRequest>,
) -> Result<(StatusCode, Json<Report>)> {
    request.validate()?;

    let mut report = Report::new(
        request.name,
        request.report_type,
        request.category,
        request.provider,
    );
    if let Some(id) = request.id {
        if let Some(existing) = state.store.get_report(&id).await? {
            report.created_at = existing.created_at;
        }
        report = report.with_id(id);
    }

    state.store.save_report(&report).await?;
    state.aggregator().invalidate_report(&report.id).await;

    Ok((StatusCode::CREATED, Json(report)))
}

/// List reports by classification
pub async fn list_reports(
    State(state): State<AppState>,
    Query(filter): Query<ReportFilter>,
) -> Result<Json<Vec<Report>>> {
    Ok(Json(state.store.list_reports(&filter).await?))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Report>> {
    let report = state
        .aggregator()
        .report(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Report {} not found", id)))?;
    Ok(Json(report))
}

pub async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.store.delete_report(&id).await?;
    state.aggregator().invalidate_report(&id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl RangeQuery {
    fn range(&self) -> TimeRange {
        TimeRange {
            start: self.from,
            end: self.to,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeResponse {
    pub report_id: Uuid,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub terminal_executions: usize,
    pub records_processed: u64,
}

/// Records processed by a report's terminal executions in a time range
pub async fn report_volume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<VolumeResponse>> {
    if state.aggregator().report(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("Report {} not found", id)));
    }

    let range = query.range();
    let (samples, records) = futures::try_join!(
        state.store.duration_samples(&id, &range),
        state.store.records_processed(&id, &range),
    )?;

    Ok(Json(VolumeResponse {
        report_id: id,
        from: query.from,
        to: query.to,
        terminal_executions: samples.len(),
        records_processed: records,
    }))
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct StartExecutionRequest {
    pub id: Option<Uuid>,
    pub report_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub started_by: String,
    /// Defaults to now
    pub start_time: Option<DateTime<Utc>>,
}

/// Record the start of an execution
pub async fn start_execution(
    State(state): State<AppState>,
    Json(request): Json<StartExecutionRequest>,
) -> Result<(StatusCode, Json<ReportExecution>)> {
    request.validate()?;

    let start_time = request
        .start_time
        .unwrap_or_else(|| state.aggregator().clock().now());
    let mut execution = ReportExecution::start(request.report_id, request.started_by, start_time);
    if let Some(id) = request.id {
        execution = execution.with_id(id);
    }

    state.store.append_execution(&execution).await?;
    Ok((StatusCode::CREATED, Json(execution)))
}

#[derive(Debug, Deserialize)]
pub struct CompleteExecutionRequest {
    pub status: ExecutionStatus,
    /// Defaults to now
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub records_processed: u64,
    pub error_message: Option<String>,
}

/// Move a running execution to its terminal status
pub async fn complete_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CompleteExecutionRequest>,
) -> Result<Json<ReportExecution>> {
    let completion = ExecutionCompletion {
        status: request.status,
        end_time: request
            .end_time
            .unwrap_or_else(|| state.aggregator().clock().now()),
        records_processed: request.records_processed,
        error_message: request.error_message,
    };

    let execution = state.store.complete_execution(&id, &completion).await?;
    Ok(Json(execution))
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReportExecution>> {
    let execution = state
        .store
        .get_execution(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", id)))?;
    Ok(Json(execution))
}

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub report_id: Option<Uuid>,
    pub started_by: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_page_size")]
    pub limit: usize,
    /// Resume position returned by the previous page
    pub cursor: Option<String>,
}

fn default_page_size() -> usize {
    100
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionListResponse {
    pub executions: Vec<ReportExecution>,
    pub next_cursor: Option<String>,
}

/// One page of executions ordered by start time
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<ExecutionListResponse>> {
    let filter = ExecutionFilter {
        report_id: query.report_id,
        started_by: query.started_by,
        time_range: TimeRange {
            start: query.from,
            end: query.to,
        },
        statuses: query.status.into_iter().collect(),
    };

    let mut page = PageRequest::first(query.limit.min(1000));
    if let Some(cursor) = &query.cursor {
        page.after = Some(decode_cursor(cursor)?);
    }

    let page = state.store.list_executions(&filter, &page).await?;
    Ok(Json(ExecutionListResponse {
        executions: page.executions,
        next_cursor: page.next.map(|c| encode_cursor(&c)),
    }))
}

fn encode_cursor(cursor: &ScanCursor) -> String {
    hex::encode(&cursor.0)
}

fn decode_cursor(cursor: &str) -> Result<ScanCursor> {
    hex::decode(cursor)
        .map(ScanCursor)
        .map_err(|_| AppError::Validation(format!("invalid cursor: {}", cursor)))
}
