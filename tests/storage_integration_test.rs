mod common;

use chrono::Duration;
use cmdb_report_analytics::{
    analytics::{Aggregator, RecomputeScope, SledSnapshotRepository, ViewName},
    error::AppError,
    models::{ExecutionStatus, Report, ReportExecution, TimeRange},
    state::{
        collect_executions, ExecutionCompletion, ExecutionFilter, ExecutionLogStore,
        InMemoryStore, PageRequest, ReportFilter, SledStore,
    },
};
use common::*;
use std::sync::Arc;
use tempfile::TempDir;

/// Suite that runs against any ExecutionLogStore implementation
async fn test_store_operations<S: ExecutionLogStore + 'static>(store: Arc<S>) {
    // Reports
    let vpcs = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    let spend = seed_report(store.as_ref(), "Spend", "finance", "gcp").await;

    let retrieved = store.get_report(&vpcs.id).await.unwrap();
    assert_eq!(retrieved.as_ref().map(|r| r.name.as_str()), Some("VPCs"));

    let filter = ReportFilter {
        provider: Some("gcp".to_string()),
        ..Default::default()
    };
    let reports = store.list_reports(&filter).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id, spend.id);

    // Renaming keeps the id and moves the dimension index
    let moved = Report {
        provider: "azure".to_string(),
        ..spend.clone()
    };
    store.save_report(&moved).await.unwrap();
    assert!(store.list_reports(&filter).await.unwrap().is_empty());

    // Appends
    let orphan = ReportExecution::start(uuid::Uuid::new_v4(), "ivan", epoch());
    assert!(matches!(
        store.append_execution(&orphan).await,
        Err(AppError::NotFound(_))
    ));

    let executions = seed_scenario(store.as_ref(), vpcs.id, epoch() - Duration::days(1)).await;
    let running = start(store.as_ref(), vpcs.id, "olga", epoch() - Duration::minutes(5)).await;
    assert!(matches!(
        store.append_execution(&running).await,
        Err(AppError::Conflict(_))
    ));

    let fetched = store.get_execution(&executions[4].id).await.unwrap().unwrap();
    assert_eq!(fetched.status, ExecutionStatus::Error);
    assert_eq!(fetched.duration_ms, Some(5000));
    assert_eq!(fetched.error_message.as_deref(), Some("timeout"));

    // Completion cannot rewrite a terminal execution
    let again = ExecutionCompletion {
        status: ExecutionStatus::Success,
        end_time: epoch(),
        records_processed: 1,
        error_message: None,
    };
    assert!(store.complete_execution(&executions[0].id, &again).await.is_err());

    // Counting and filtering
    assert_eq!(
        store.count_executions(&ExecutionFilter::default()).await.unwrap(),
        6
    );
    assert_eq!(
        store
            .count_executions(&ExecutionFilter::default().terminal_only())
            .await
            .unwrap(),
        5
    );
    assert_eq!(
        store
            .count_executions(&ExecutionFilter::for_user("olga"))
            .await
            .unwrap(),
        1
    );

    // Paging walks start-time order without gaps or repeats
    let mut seen = Vec::new();
    let mut page = PageRequest::first(2);
    loop {
        let batch = store
            .list_executions(&ExecutionFilter::for_report(vpcs.id), &page)
            .await
            .unwrap();
        assert!(batch.executions.len() <= 2);
        seen.extend(batch.executions);
        match batch.next {
            Some(cursor) => page.after = Some(cursor),
            None => break,
        }
    }
    assert_eq!(seen.len(), 6);
    assert!(seen.windows(2).all(|w| w[0].start_time <= w[1].start_time));
    assert_eq!(seen.last().map(|e| e.id), Some(running.id));

    let window = TimeRange::new(
        epoch() - Duration::days(1) + Duration::hours(2),
        epoch() - Duration::days(1) + Duration::hours(4),
    );
    let in_window = collect_executions(
        store.as_ref(),
        &ExecutionFilter::for_report(vpcs.id).within(window),
        10,
    )
    .await
    .unwrap();
    assert_eq!(in_window.len(), 2);

    // Covering indexes
    let samples = store.duration_samples(&vpcs.id, &window).await.unwrap();
    let mut durations: Vec<i64> = samples.iter().map(|s| s.duration_ms).collect();
    durations.sort_unstable();
    assert_eq!(durations, vec![200, 300]);
    assert_eq!(
        store
            .records_processed(&vpcs.id, &TimeRange::default())
            .await
            .unwrap(),
        50
    );

    // Referenced reports cannot be deleted; unreferenced ones can
    assert!(matches!(
        store.delete_report(&vpcs.id).await,
        Err(AppError::Conflict(_))
    ));
    store.delete_report(&spend.id).await.unwrap();
    assert!(store.get_report(&spend.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_memory_store() {
    test_store_operations(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn test_sled_store() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SledStore::new(temp_dir.path()).unwrap());
    test_store_operations(store).await;
}

#[tokio::test]
async fn test_sled_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let report_id;
    {
        let store = SledStore::new(temp_dir.path()).unwrap();
        let report = seed_report(&store, "VPCs", "network", "aws").await;
        seed_scenario(&store, report.id, epoch() - Duration::days(1)).await;
        store.flush().await.unwrap();
        report_id = report.id;
    }

    let store = SledStore::new(temp_dir.path()).unwrap();
    assert!(store.get_report(&report_id).await.unwrap().is_some());
    assert_eq!(
        store
            .count_executions(&ExecutionFilter::for_report(report_id))
            .await
            .unwrap(),
        5
    );
    assert_eq!(
        store
            .records_processed(&report_id, &TimeRange::default())
            .await
            .unwrap(),
        50
    );
}

#[tokio::test]
async fn test_snapshots_restore_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let repository = Arc::new(SledSnapshotRepository::new(temp_dir.path()).unwrap());

    let store = Arc::new(InMemoryStore::new());
    let report = seed_report(store.as_ref(), "VPCs", "network", "aws").await;
    seed_scenario(store.as_ref(), report.id, epoch() - Duration::hours(10)).await;
    record(store.as_ref(), report.id, "olga", epoch() - Duration::hours(1), 50, ExecutionStatus::Error, 0).await;

    let first = Aggregator::builder(store.clone())
        .clock(manual_clock())
        .repository(repository.clone())
        .build()
        .unwrap();
    first
        .recompute(RecomputeScope::Full)
        .await
        .ensure_complete()
        .unwrap();
    repository.flush().unwrap();

    // a second aggregator over the same repository starts warm
    let second = Aggregator::builder(store)
        .clock(manual_clock())
        .repository(repository)
        .build()
        .unwrap();
    for view in ViewName::ALL {
        let before = first.snapshot(view).unwrap();
        let after = second
            .snapshot(view)
            .unwrap_or_else(|| panic!("{} was not restored", view));
        assert_eq!(after.computed_at, before.computed_at);
        assert_eq!(after.data, before.data, "{} restored differently", view);
        assert_eq!(after.watermark, before.watermark);
    }
    assert_eq!(second.pass_count(ViewName::ReportsSummary), 0);
}
