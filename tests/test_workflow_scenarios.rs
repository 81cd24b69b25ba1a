//! End-to-end workflow scenarios through the service facade
//!
//! Exercises the aggregation guarantees: running averages, floor division,
//! no lost updates under concurrency and fail-fast processing.


use proptest::prelude::*;
use std::sync::Arc;
use task_aggregator::error::TrackerError;
use task_aggregator::pipeline::ProcessingPipeline;
use task_aggregator::protocol::{TaskContext, WorkflowSelector};
use task_aggregator::store::{AggregateStore, InMemoryAggregateStore};
use task_aggregator::testing::mocks::{FailingStep, RecordingStep};
use task_aggregator::workflow::{AverageCalculator, TaskProcessor, TaskService, WorkflowDispatcher};
use test_helpers::{event, in_memory_service};

#[tokio::test]
async fn test_two_events_average_to_midpoint() {
    let (service, _) = in_memory_service();

    service.submit_task_event(event("t1", 1000)).await.unwrap();
    service.submit_task_event(event("t1", 2000)).await.unwrap();

    let average = service.request_average("t1").await.unwrap();
    assert_eq!(average.task_id, "t1");
    assert_eq!(average.average_duration_ms, 1500);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let (service, _) = in_memory_service();
    service.submit_task_event(event("t1", 1000)).await.unwrap();

    let err = service.request_average("ghost").await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound { .. }));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_average_uses_floor_division() {
    let (service, _) = in_memory_service();
    for duration in [1, 2, 2] {
        service.submit_task_event(event("t3", duration)).await.unwrap();
    }

    assert_eq!(
        service.request_average("t3").await.unwrap().average_duration_ms,
        1
    );
}

#[tokio::test]
async fn test_tasks_are_aggregated_independently() {
    let (service, _) = in_memory_service();
    service.submit_task_event(event("a", 100)).await.unwrap();
    service.submit_task_event(event("b", 900)).await.unwrap();

    assert_eq!(service.request_average("a").await.unwrap().average_duration_ms, 100);
    assert_eq!(service.request_average("b").await.unwrap().average_duration_ms, 900);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_are_all_counted() {
    let (service, store) = in_memory_service();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.submit_task_event(event("t2", 1000)).await })
        })
        .collect();
    for handle in futures::future::join_all(handles).await {
        handle.unwrap().unwrap();
    }

    let record = store.get("t2").await.unwrap().unwrap();
    assert_eq!(record.count, 5);
    assert_eq!(record.total_duration_ms, 5000);
    assert_eq!(
        service.request_average("t2").await.unwrap().average_duration_ms,
        1000
    );
}

#[tokio::test]
async fn test_failed_step_leaves_aggregate_untouched() {
    let store = Arc::new(InMemoryAggregateStore::new());
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let pipeline = ProcessingPipeline::new(
        vec![
            Box::new(RecordingStep::new("validate", log.clone())),
            Box::new(FailingStep::new("notify", "endpoint unreachable")),
            Box::new(RecordingStep::new("archive", log.clone())),
        ],
        2,
    );
    let service = TaskService::new(store.clone(), pipeline);

    let err = service.submit_task_event(event("t1", 1000)).await.unwrap_err();
    assert!(matches!(err, TrackerError::Processing { .. }));
    assert_eq!(err.status_code(), 500);
    assert_eq!(*log.lock().unwrap(), vec!["validate"]);
    assert_eq!(store.get("t1").await.unwrap(), None);

    let err = service.request_average("t1").await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound { .. }));
}

#[tokio::test]
async fn test_dispatch_rejects_absent_and_invalid_contexts() {
    let store = Arc::new(InMemoryAggregateStore::new());
    let dispatcher = WorkflowDispatcher::new(
        TaskProcessor::new(Arc::new(ProcessingPipeline::empty()), store.clone()),
        AverageCalculator::new(store.clone()),
    );

    let err = dispatcher.dispatch(None).await.unwrap_err();
    assert!(matches!(err, TrackerError::ContractViolation { .. }));

    let invalid = TaskContext::new(event("t1", 10), WorkflowSelector::InvalidWorkflow);
    let err = dispatcher.dispatch(Some(invalid)).await.unwrap_err();
    assert!(matches!(err, TrackerError::ContractViolation { .. }));
    assert_eq!(store.get("t1").await.unwrap(), None);
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_accumulation_loses_no_updates(
        durations in proptest::collection::vec(0u64..10_000, 1..40)
    ) {
        let (total, count, average) = runtime().block_on(async {
            let (service, store) = in_memory_service();
            let handles: Vec<_> = durations
                .iter()
                .map(|&duration| {
                    let service = service.clone();
                    tokio::spawn(async move { service.submit_task_event(event("p", duration)).await })
                })
                .collect();
            for handle in futures::future::join_all(handles).await {
                handle.unwrap().unwrap();
            }

            let record = store.get("p").await.unwrap().unwrap();
            let average = service.request_average("p").await.unwrap().average_duration_ms;
            (record.total_duration_ms, record.count, average)
        });

        let expected_total: u64 = durations.iter().sum();
        prop_assert_eq!(total, expected_total);
        prop_assert_eq!(count, durations.len() as u64);
        prop_assert_eq!(average, expected_total / durations.len() as u64);
    }
}
