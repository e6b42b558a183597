//! Integration tests for the aggregator and its eight views

mod common;

use chrono::{Duration, TimeZone, Utc};
use cmdb_report_analytics::analytics::*;
use cmdb_report_analytics::models::{bucket_start, ExecutionStatus, ReportExecution};
use cmdb_report_analytics::scheduler::{ReadMode, RefreshScheduler, SchedulerConfig};
use cmdb_report_analytics::state::{ExecutionLogStore, InMemoryStore};
use common::*;
use std::sync::Arc;

fn summary_rows(aggregator: &Aggregator) -> Vec<ReportSummaryRow> {
    match &aggregator.snapshot(ViewName::ReportsSummary).unwrap().data {
        ViewData::ReportsSummary(rows) => rows.values().cloned().collect(),
        other => panic!("unexpected data {:?}", other.view()),
    }
}

fn alert_rows(aggregator: &Aggregator) -> Vec<PerformanceAlert> {
    match &aggregator.snapshot(ViewName::PerformanceAlerts).unwrap().data {
        ViewData::PerformanceAlerts(rows) => rows.values().cloned().collect(),
        other => panic!("unexpected data {:?}", other.view()),
    }
}

#[tokio::test]
async fn test_daily_metrics_scenario() {
    let store = Arc::new(InMemoryStore::new());
    let report = seed_report(store.as_ref(), "VPC inventory", "network", "aws").await;
    let day = Utc.with_ymd_and_hms(2024, 9, 9, 0, 0, 0).unwrap();
    seed_scenario(store.as_ref(), report.id, day).await;

    let aggregator = aggregator(store, manual_clock());
    aggregator
        .recompute(RecomputeScope::Full)
        .await
        .ensure_complete()
        .unwrap();

    let snapshot = aggregator
        .snapshot(ViewName::DailyExecutionMetrics)
        .unwrap();
    let ViewData::DailyExecutionMetrics(rows) = &snapshot.data else {
        panic!("wrong view data");
    };
    let row = &rows[&(report.id, day.date_naive())];
    assert_eq!(row.execution_count, 5);
    assert_eq!(row.success_count, 4);
    assert_eq!(row.error_count, 1);
    assert_eq!(row.success_rate, Some(0.8));
    assert_eq!(row.avg_duration_ms, 1200.0);
    assert_eq!(row.min_duration_ms, 100);
    assert_eq!(row.max_duration_ms, 5000);
    assert_eq!(row.p50_duration_ms, 300.0);
    assert!((row.p95_duration_ms - 4080.0).abs() < 1e-9);
    assert_eq!(row.records_processed, 50);
}

#[tokio::test]
async fn test_summary_success_rate_matches_log() {
    let store = Arc::new(InMemoryStore::new());
    let vpcs = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    let idle = seed_report(store.as_ref(), "Idle subnets", "network", "gcp").await;
    let base = epoch() - Duration::days(3);

    for (i, status) in [
        ExecutionStatus::Success,
        ExecutionStatus::Success,
        ExecutionStatus::Cancelled,
    ]
    .into_iter()
    .enumerate()
    {
        record(store.as_ref(), vpcs.id, "ivan", base + Duration::minutes(i as i64), 1000, status, 5).await;
    }
    // running executions are not part of any aggregate
    start(store.as_ref(), vpcs.id, "ivan", base + Duration::hours(1)).await;

    let aggregator = aggregator(store, manual_clock());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();

    let rows = summary_rows(&aggregator);
    let vpc_row = rows.iter().find(|r| r.report_id == vpcs.id).unwrap();
    assert_eq!(vpc_row.total_executions, 3);
    assert_eq!(vpc_row.cancelled_count, 1);
    assert_eq!(vpc_row.success_rate, Some(2.0 / 3.0));
    assert_eq!(vpc_row.last_status, Some(ExecutionStatus::Cancelled));
    assert_eq!(vpc_row.records_processed, 15);

    let idle_row = rows.iter().find(|r| r.report_id == idle.id).unwrap();
    assert_eq!(idle_row.total_executions, 0);
    assert_eq!(idle_row.success_rate, None);
    assert_eq!(idle_row.avg_duration_ms, None);
    assert_eq!(idle_row.last_run_at, None);
}

#[tokio::test]
async fn test_incremental_converges_with_full() {
    let store = Arc::new(InMemoryStore::new());
    let clock = manual_clock();
    let vpcs = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    let gateways = seed_report(store.as_ref(), "Transit gateways", "routing", "aws").await;

    let yesterday = epoch() - Duration::days(1);
    seed_scenario(store.as_ref(), vpcs.id, yesterday).await;
    record(store.as_ref(), gateways.id, "olga", yesterday, 700, ExecutionStatus::Success, 3).await;
    let pending = start(store.as_ref(), gateways.id, "olga", epoch() - Duration::hours(1)).await;

    let incremental = aggregator(store.clone(), clock.clone());
    incremental.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    let first = incremental.snapshot(ViewName::ReportsSummary).unwrap().computed_at;

    // new activity after the first pass, a new report with a new provider,
    // and the completion of an execution that was running
    clock.advance(Duration::minutes(10));
    let subnets = seed_report(store.as_ref(), "Subnets", "network", "azure").await;
    record(store.as_ref(), subnets.id, "ivan", epoch() + Duration::minutes(2), 250, ExecutionStatus::Error, 0).await;
    record(store.as_ref(), vpcs.id, "petra", epoch() + Duration::minutes(3), 900, ExecutionStatus::Success, 7).await;
    store
        .complete_execution(
            &pending.id,
            &cmdb_report_analytics::state::ExecutionCompletion {
                status: ExecutionStatus::Success,
                end_time: epoch() + Duration::minutes(5),
                records_processed: 11,
                error_message: None,
            },
        )
        .await
        .unwrap();

    incremental
        .recompute(RecomputeScope::Incremental { since: first })
        .await
        .ensure_complete()
        .unwrap();

    let full = aggregator(store, clock);
    full.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();

    for view in ViewName::ALL {
        let a = incremental.snapshot(view).unwrap();
        let b = full.snapshot(view).unwrap();
        if view == ViewName::PerformanceAlerts {
            // detectedAt differs by construction; the alert set must not
            let keys = |d: &ViewData| match d {
                ViewData::PerformanceAlerts(rows) => rows.keys().cloned().collect::<Vec<_>>(),
                _ => unreachable!(),
            };
            assert_eq!(keys(&a.data), keys(&b.data));
        } else {
            assert_eq!(a.data, b.data, "{} diverged", view);
        }
    }
}

#[tokio::test]
async fn test_incremental_with_no_new_data_is_a_no_op() {
    let store = Arc::new(InMemoryStore::new());
    let clock = manual_clock();
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    seed_scenario(store.as_ref(), report.id, epoch() - Duration::hours(12)).await;

    let aggregator = aggregator(store, clock.clone());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    let before: Vec<_> = ViewName::ALL
        .iter()
        .map(|v| aggregator.snapshot(*v).unwrap())
        .collect();

    clock.advance(Duration::seconds(30));
    let since = before[0].computed_at;
    aggregator
        .recompute(RecomputeScope::Incremental { since })
        .await
        .ensure_complete()
        .unwrap();

    for previous in before {
        let current = aggregator.snapshot(previous.view).unwrap();
        assert_eq!(current.data, previous.data, "{} changed", previous.view);
        assert!(current.computed_at > previous.computed_at);
    }
}

#[tokio::test]
async fn test_recent_executions_window() {
    let store = Arc::new(InMemoryStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    let base = epoch() - Duration::hours(6);
    for i in 0..5 {
        record(store.as_ref(), report.id, "ivan", base + Duration::minutes(i), 100, ExecutionStatus::Success, 1).await;
    }
    let running = start(store.as_ref(), report.id, "ivan", base + Duration::minutes(30)).await;

    let config = AnalyticsConfigBuilder::new().recent_window(3).build().unwrap();
    let clock = manual_clock();
    let aggregator = aggregator_with(store.clone(), clock.clone(), config);
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();

    let window = |aggregator: &Aggregator| -> Vec<ReportExecution> {
        match &aggregator.snapshot(ViewName::RecentExecutions).unwrap().data {
            ViewData::RecentExecutions(rows) => rows.clone(),
            _ => unreachable!(),
        }
    };
    let rows = window(&aggregator);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].id, running.id);
    assert!(rows.windows(2).all(|w| recent_order(&w[0], &w[1]).is_lt()));

    // an execution older than the window minimum leaves the view unchanged
    let first = aggregator.snapshot(ViewName::RecentExecutions).unwrap().computed_at;
    clock.advance(Duration::minutes(1));
    record(store.as_ref(), report.id, "ivan", base - Duration::hours(1), 100, ExecutionStatus::Success, 1).await;
    aggregator
        .recompute_view(ViewName::RecentExecutions, RecomputeScope::Incremental { since: first })
        .await
        .unwrap();
    assert_eq!(window(&aggregator), rows);
}

#[tokio::test]
async fn test_percentiles_are_deterministic() {
    let store = Arc::new(InMemoryStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    let day = epoch() - Duration::days(2);
    for (i, duration) in [730, 125, 125, 9_999, 3, 480, 480, 61].into_iter().enumerate() {
        record(store.as_ref(), report.id, "ivan", day + Duration::minutes(i as i64), duration, ExecutionStatus::Success, 0).await;
    }

    let aggregator = aggregator(store, manual_clock());
    let p95 = |aggregator: &Aggregator| match &aggregator.snapshot(ViewName::DailyExecutionMetrics).unwrap().data {
        ViewData::DailyExecutionMetrics(rows) => rows.values().next().unwrap().p95_duration_ms.to_bits(),
        _ => unreachable!(),
    };

    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    let first = p95(&aggregator);
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    assert_eq!(p95(&aggregator), first);
}

#[tokio::test]
async fn test_duration_alert_against_baseline() {
    let store = Arc::new(InMemoryStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    // baseline p95 = 4080, threshold 8160 with the default multiplier
    seed_scenario(store.as_ref(), report.id, epoch() - Duration::days(5)).await;
    record(store.as_ref(), report.id, "ivan", epoch() - Duration::hours(3), 8_000, ExecutionStatus::Success, 1).await;
    let slow = record(store.as_ref(), report.id, "ivan", epoch() - Duration::hours(2), 9_000, ExecutionStatus::Success, 1).await;

    let aggregator = aggregator(store, manual_clock());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();

    let alerts = alert_rows(&aggregator);
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.alert_type, AlertType::Duration);
    assert_eq!(alert.execution_id, Some(slow.id));
    assert!((alert.threshold - 8160.0).abs() < 1e-6);
    assert_eq!(alert.measured, 9000.0);
    assert_eq!(alert.severity, AlertSeverity::Low);
}

#[tokio::test]
async fn test_failure_rate_alert_follows_current_truth() {
    let store = Arc::new(InMemoryStore::new());
    let clock = manual_clock();
    let report = seed_report(store.as_ref(), "Endpoints", "network", "aws").await;
    let recent = epoch() - Duration::hours(5);
    record(store.as_ref(), report.id, "ivan", recent, 100, ExecutionStatus::Success, 1).await;
    record(store.as_ref(), report.id, "ivan", recent + Duration::minutes(1), 100, ExecutionStatus::Error, 0).await;
    record(store.as_ref(), report.id, "ivan", recent + Duration::minutes(2), 100, ExecutionStatus::Error, 0).await;

    let aggregator = aggregator(store.clone(), clock.clone());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();

    let alerts = alert_rows(&aggregator);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::FailureRate);
    assert_eq!(alerts[0].severity, AlertSeverity::High);
    let first_seen = alerts[0].detected_at;

    // still failing a minute later: same alert, measured value refreshed
    clock.advance(Duration::minutes(1));
    record(store.as_ref(), report.id, "ivan", epoch(), 100, ExecutionStatus::Success, 1).await;
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    let alerts = alert_rows(&aggregator);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].measured, 0.5);
    assert_eq!(alerts[0].detected_at, first_seen);

    // enough successes bring the rate back to the floor and the alert goes
    for i in 0..6 {
        record(store.as_ref(), report.id, "ivan", epoch() + Duration::seconds(i), 100, ExecutionStatus::Success, 1).await;
    }
    clock.advance(Duration::minutes(1));
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    assert!(alert_rows(&aggregator).is_empty());
}

#[tokio::test]
async fn test_alerts_idempotent_without_new_data() {
    let store = Arc::new(InMemoryStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    seed_scenario(store.as_ref(), report.id, epoch() - Duration::hours(10)).await;
    // 4 of 6 succeeded, under the 0.8 floor
    record(store.as_ref(), report.id, "ivan", epoch() - Duration::hours(1), 100, ExecutionStatus::Error, 0).await;

    let aggregator = aggregator(store, manual_clock());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    let first = alert_rows(&aggregator);
    assert!(!first.is_empty());

    let since = aggregator.snapshot(ViewName::PerformanceAlerts).unwrap().computed_at;
    aggregator
        .recompute(RecomputeScope::Incremental { since })
        .await
        .ensure_complete()
        .unwrap();
    assert_eq!(alert_rows(&aggregator), first);
}

#[tokio::test]
async fn test_trend_deltas() {
    let store = Arc::new(InMemoryStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    let width = Duration::days(7);
    let current = bucket_start(epoch(), width);
    let previous = current - width;

    for i in 0..2 {
        record(store.as_ref(), report.id, "ivan", previous + Duration::hours(i), 1000, ExecutionStatus::Success, 1).await;
    }
    for (i, status) in [ExecutionStatus::Success, ExecutionStatus::Error, ExecutionStatus::Error]
        .into_iter()
        .enumerate()
    {
        record(store.as_ref(), report.id, "ivan", current + Duration::minutes(i as i64), 400, status, 1).await;
    }

    let aggregator = aggregator(store, manual_clock());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();

    let snapshot = aggregator.snapshot(ViewName::ExecutionTrends).unwrap();
    let ViewData::ExecutionTrends(rows) = &snapshot.data else {
        panic!("wrong view data");
    };
    let earlier = &rows[&(report.id, previous)];
    assert_eq!(earlier.count_delta, None);
    assert_eq!(earlier.success_rate_delta, None);

    let latest = &rows[&(report.id, current)];
    assert_eq!(latest.bucket_end, current + width);
    assert_eq!(latest.count_delta, Some(1));
    assert_eq!(latest.avg_duration_delta_ms, Some(-600.0));
    let rate_delta = latest.success_rate_delta.unwrap();
    assert!((rate_delta - (1.0 / 3.0 - 1.0)).abs() < 1e-9);
}

#[tokio::test]
async fn test_dimension_and_user_views() {
    let store = Arc::new(InMemoryStore::new());
    let vpcs = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    let gateways = seed_report(store.as_ref(), "Transit gateways", "routing", "aws").await;
    let day = epoch() - Duration::days(1);
    record(store.as_ref(), vpcs.id, "ivan", day, 100, ExecutionStatus::Success, 4).await;
    record(store.as_ref(), gateways.id, "ivan", day + Duration::hours(1), 300, ExecutionStatus::Error, 0).await;
    record(store.as_ref(), gateways.id, "olga", day + Duration::hours(2), 200, ExecutionStatus::Success, 6).await;

    let aggregator = aggregator(store, manual_clock());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();

    let snapshot = aggregator.snapshot(ViewName::ProviderPerformance).unwrap();
    let ViewData::ProviderPerformance(providers) = &snapshot.data else {
        panic!("wrong view data");
    };
    let aws = &providers["aws"];
    assert_eq!(aws.report_count, 2);
    assert_eq!(aws.execution_count, 3);
    assert_eq!(aws.avg_duration_ms, Some(200.0));

    let snapshot = aggregator.snapshot(ViewName::CategoryPerformance).unwrap();
    let ViewData::CategoryPerformance(categories) = &snapshot.data else {
        panic!("wrong view data");
    };
    assert_eq!(categories.len(), 2);
    assert_eq!(categories["routing"].success_rate, Some(0.5));

    let snapshot = aggregator.snapshot(ViewName::UserActivity).unwrap();
    let ViewData::UserActivity(users) = &snapshot.data else {
        panic!("wrong view data");
    };
    let ivan = &users["ivan"];
    assert_eq!(ivan.execution_count, 2);
    assert_eq!(ivan.distinct_reports, 2);
    assert_eq!(ivan.records_processed, 4);
    assert_eq!(ivan.last_used_at, day + Duration::hours(1));
}

#[tokio::test]
async fn test_invalid_records_are_skipped() {
    let store = Arc::new(InMemoryStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    record(store.as_ref(), report.id, "ivan", epoch() - Duration::days(1), 100, ExecutionStatus::Success, 1).await;

    // terminal status without an end time
    let mut broken = ReportExecution::start(report.id, "ivan", epoch() - Duration::days(1));
    broken.status = ExecutionStatus::Success;
    broken.duration_ms = Some(100);
    store.append_execution(&broken).await.unwrap();

    let aggregator = aggregator(store, manual_clock());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();

    let rows = summary_rows(&aggregator);
    assert_eq!(rows[0].total_executions, 1);
}

#[tokio::test]
async fn test_source_failure_keeps_previous_snapshots() {
    let store = Arc::new(ControlledStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    seed_scenario(store.as_ref(), report.id, epoch() - Duration::days(1)).await;

    let clock = manual_clock();
    let aggregator = aggregator(store.clone(), clock.clone());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    let before = aggregator.snapshot(ViewName::ReportsSummary).unwrap();

    clock.advance(Duration::minutes(5));
    store.set_failing(true);
    let report = aggregator.recompute(RecomputeScope::Full).await;
    assert_eq!(report.failures.len(), 8);
    assert!(report.computed.is_empty());
    assert!(matches!(
        report.ensure_complete(),
        Err(AnalyticsError::SourceUnavailable(_))
    ));

    let after = aggregator.snapshot(ViewName::ReportsSummary).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(aggregator.last_error(ViewName::ReportsSummary).unwrap().is_transient());

    store.set_failing(false);
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    assert!(aggregator.last_error(ViewName::ReportsSummary).is_none());
}

#[tokio::test]
async fn test_one_failing_family_does_not_block_the_rest() {
    let store = Arc::new(ControlledStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    seed_scenario(store.as_ref(), report.id, epoch() - Duration::days(3)).await;
    record(store.as_ref(), report.id, "ivan", epoch() - Duration::hours(1), 250, ExecutionStatus::Success, 5).await;

    let clock = manual_clock();
    let aggregator = aggregator(store.clone(), clock.clone());
    aggregator.recompute(RecomputeScope::Full).await.ensure_complete().unwrap();
    let alerts_before = aggregator.snapshot(ViewName::PerformanceAlerts).unwrap();

    clock.advance(Duration::minutes(5));
    store.set_failing_baselines(true);
    let report = aggregator.recompute(RecomputeScope::Full).await;

    assert_eq!(
        report.failures.keys().copied().collect::<Vec<_>>(),
        vec![ViewName::PerformanceAlerts]
    );
    assert_eq!(report.computed.len(), 7);
    for view in ViewName::ALL.iter().filter(|v| **v != ViewName::PerformanceAlerts) {
        let snapshot = aggregator.snapshot(*view).unwrap();
        assert_eq!(snapshot.computed_at, epoch() + Duration::minutes(5), "{}", view);
    }
    let alerts_after = aggregator.snapshot(ViewName::PerformanceAlerts).unwrap();
    assert!(Arc::ptr_eq(&alerts_before, &alerts_after));

    match report.ensure_complete() {
        Err(AnalyticsError::PartialComputeFailure { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].view, ViewName::PerformanceAlerts);
        }
        other => panic!("expected a partial failure, got {:?}", other),
    }

    // readers keep getting the last good alerts, flagged stale
    let scheduler = RefreshScheduler::new(aggregator.clone(), SchedulerConfig::default()).unwrap();
    let read = scheduler
        .read(ViewName::PerformanceAlerts, ReadMode::ServeStale)
        .await
        .unwrap();
    assert!(read.is_stale);
    assert_eq!(read.snapshot.computed_at, epoch());

    let read = scheduler
        .read(ViewName::ReportsSummary, ReadMode::ServeStale)
        .await
        .unwrap();
    assert!(!read.is_stale);
}

#[tokio::test]
async fn test_concurrent_requests_coalesce() {
    let store = Arc::new(ControlledStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    seed_scenario(store.as_ref(), report.id, epoch() - Duration::days(1)).await;
    store.set_delay(std::time::Duration::from_millis(20));

    let aggregator = aggregator(store, manual_clock());
    let view = ViewName::ProviderPerformance;
    let (a, b, c) = tokio::join!(
        aggregator.recompute_view(view, RecomputeScope::Full),
        aggregator.recompute_view(view, RecomputeScope::Full),
        aggregator.recompute_view(view, RecomputeScope::Full),
    );

    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
    assert_eq!(aggregator.pass_count(view), 1);
}

#[tokio::test]
async fn test_full_request_supersedes_incremental() {
    let store = Arc::new(ControlledStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    seed_scenario(store.as_ref(), report.id, epoch() - Duration::days(1)).await;

    let aggregator = aggregator(store.clone(), manual_clock());
    let view = ViewName::UserActivity;
    aggregator.recompute_view(view, RecomputeScope::Full).await.unwrap();
    let since = aggregator.snapshot(view).unwrap().computed_at;

    store.set_delay(std::time::Duration::from_millis(20));
    let (incremental, full) = tokio::join!(
        aggregator.recompute_view(view, RecomputeScope::Incremental { since }),
        aggregator.recompute_view(view, RecomputeScope::Full),
    );

    // the incremental waiter is answered by the full pass or a pass after it
    let (incremental, full) = (incremental.unwrap(), full.unwrap());
    assert_eq!(incremental.data, full.data);
    assert!(incremental.computed_at >= full.computed_at);
    assert!(!aggregator.is_in_flight(view));
}
