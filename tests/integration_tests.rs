//! Integration test harness
//!
//! End-to-end job execution against the mock and local backends

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fanout::backend::{
    ActivationStatus, BackendCapabilities, ComputeBackend, LocalBackend, MockBackend, MockBehavior,
    MockConfig, MockRejection, ResourceHints, ResultRef,
};
use fanout::executor::{
    Executor, ExecutorConfig, MapOptions, MapReduceOptions, ReducerGrouping, ReturnWhen, TaskState,
};
use fanout::function::FunctionCatalog;
use fanout::partition::{Chunking, DiscoveryOptions, MemoryObjectStore};
use fanout::types::{ActivationId, PackagedTask, TaskOutcome};
use fanout::Error;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

// ─────────────────────────────────────────────────────────────────
// Test Fixtures
// ─────────────────────────────────────────────────────────────────

/// Executor settings with millisecond polling so tests stay fast
fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        max_in_flight: 16,
        poll_initial_interval: Duration::from_millis(2),
        poll_max_interval: Duration::from_millis(10),
        running_grace: Duration::from_millis(5),
        ..Default::default()
    }
}

fn catalog() -> Arc<FunctionCatalog> {
    Arc::new(FunctionCatalog::with_builtins())
}

/// Mock backend plus an executor driving it
struct TestEnvironment {
    backend: Arc<MockBackend>,
    executor: Executor,
}

impl TestEnvironment {
    fn new() -> Self {
        Self::with_config(fast_config())
    }

    fn with_config(config: ExecutorConfig) -> Self {
        let backend = Arc::new(MockBackend::with_config(
            MockConfig {
                latency: Duration::from_millis(3),
                reports_running: true,
            },
            catalog(),
        ));
        let executor = Executor::new(config, backend.clone(), catalog()).unwrap();
        Self { backend, executor }
    }
}

/// Mock platform whose status endpoint is unreachable
struct StatusOutage {
    inner: Arc<MockBackend>,
}

#[async_trait]
impl ComputeBackend for StatusOutage {
    fn name(&self) -> &'static str {
        "status-outage"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.inner.capabilities()
    }

    async fn submit(&self, task: &PackagedTask, hints: &ResourceHints) -> fanout::Result<ActivationId> {
        self.inner.submit(task, hints).await
    }

    async fn poll(&self, activation: &ActivationId) -> fanout::Result<ActivationStatus> {
        Err(Error::transport(format!("status of {} unreachable", activation)))
    }

    async fn fetch_result(&self, result: &ResultRef) -> fanout::Result<Vec<u8>> {
        self.inner.fetch_result(result).await
    }

    async fn delete(&self, activation: &ActivationId) -> fanout::Result<()> {
        self.inner.delete(activation).await
    }
}

// ─────────────────────────────────────────────────────────────────
// Ordering Tests
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_map_results_follow_input_order() {
    let env = TestEnvironment::new();
    // Last task finishes first
    env.backend.set_latency(0, Duration::from_millis(40));
    env.backend.set_latency(3, Duration::from_millis(1));

    let handle = env
        .executor
        .map("square", vec![1, 2, 3, 4], MapOptions::default())
        .unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    assert_eq!(result.values::<i64>().unwrap(), vec![1, 4, 9, 16]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_order_preserved_under_random_latency() {
    let env = TestEnvironment::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for index in 0..64 {
        env.backend
            .set_latency(index, Duration::from_millis(rng.random_range(0..25)));
    }

    let input: Vec<i64> = (0..64).collect();
    let handle = env
        .executor
        .map("identity", input.clone(), MapOptions::default())
        .unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    assert_eq!(result.values::<i64>().unwrap(), input);
}

#[tokio::test]
async fn test_map_reduce_single_reducer() {
    let env = TestEnvironment::new();
    let handle = env
        .executor
        .map_reduce("identity", vec![1, 2, 3], "sum", MapReduceOptions::default())
        .unwrap();
    assert_eq!(handle.task_count, 4);
    assert_eq!(handle.output_count, 1);

    let result = env.executor.get_result(&handle).await.unwrap();
    assert_eq!(result.value::<i64>().unwrap(), 6);
}

#[tokio::test]
async fn test_map_reduce_per_chunk_reducers() {
    let env = TestEnvironment::new();
    let options = MapReduceOptions {
        reducer: ReducerGrouping::PerChunk(2),
        ..Default::default()
    };
    let handle = env
        .executor
        .map_reduce("square", vec![1, 2, 3, 4, 5], "sum", options)
        .unwrap();

    let result = env.executor.get_result(&handle).await.unwrap();
    assert_eq!(result.values::<i64>().unwrap(), vec![5, 25, 25]);
}

#[tokio::test]
async fn test_chunked_map_with_extra_args() {
    let env = TestEnvironment::new();
    let options = MapOptions {
        chunking: Chunking::Count(2),
        extra_args: Some(json!({"message": "unused"})),
        ..Default::default()
    };
    let handle = env.executor.map("count", vec![1, 2, 3, 4, 5], options).unwrap();

    let result = env.executor.get_result(&handle).await.unwrap();
    let counts = result.values::<usize>().unwrap();
    assert_eq!(counts.len(), 2);
    assert_eq!(counts.iter().sum::<usize>(), 5);
}

// ─────────────────────────────────────────────────────────────────
// Failure Handling Tests
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        0,
        MockBehavior {
            transient_failures: 10,
            ..Default::default()
        },
    );

    let handle = env.executor.call_async("square", 3).unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    // One initial attempt plus three retries
    assert_eq!(env.backend.submissions(0), 4);
    match &result.outcomes()[0] {
        TaskOutcome::Failed { state, .. } => assert_eq!(*state, TaskState::FailedRuntime),
        other => panic!("unexpected outcome {:?}", other),
    }
    let status = env.executor.status(&handle).unwrap();
    assert_eq!(status.tasks[0].retries, 3);
}

#[tokio::test]
async fn test_transient_failure_recovers() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        1,
        MockBehavior {
            transient_failures: 2,
            ..Default::default()
        },
    );

    let handle = env
        .executor
        .map("square", vec![2, 3, 4], MapOptions::default())
        .unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    assert_eq!(result.values::<i64>().unwrap(), vec![4, 9, 16]);
    assert_eq!(env.backend.submissions(1), 3);
    assert_eq!(env.backend.submissions(0), 1);
}

#[tokio::test]
async fn test_submit_transport_errors_consume_retries() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        0,
        MockBehavior {
            submit_errors: 2,
            ..Default::default()
        },
    );

    let handle = env.executor.call_async("square", 5).unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    assert_eq!(result.value::<i64>().unwrap(), 25);
    assert_eq!(env.backend.submissions(0), 3);
}

#[tokio::test]
async fn test_rejected_submission_fails_dispatch() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        1,
        MockBehavior {
            reject: Some(MockRejection::Quota),
            ..Default::default()
        },
    );

    let handle = env
        .executor
        .map("square", vec![1, 2, 3], MapOptions::default())
        .unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    // Rejections are not retried
    assert_eq!(env.backend.submissions(1), 1);
    assert_eq!(result.outcomes()[0], TaskOutcome::Value { value: json!(1) });
    assert!(matches!(
        result.outcomes()[1],
        TaskOutcome::Failed {
            state: TaskState::FailedDispatch,
            ..
        }
    ));
    assert_eq!(result.outcomes()[2], TaskOutcome::Value { value: json!(9) });
}

#[tokio::test]
async fn test_user_error_does_not_affect_siblings() {
    let env = TestEnvironment::new();
    let input: Vec<Value> = (0..10)
        .map(|i| if i == 6 { json!("not a number") } else { json!(i) })
        .collect();

    let handle = env.executor.map("square", input, MapOptions::default()).unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    let errors: Vec<usize> = result.errors().map(|(index, _)| index).collect();
    assert_eq!(errors, vec![6]);
    assert!(matches!(result.outcomes()[6], TaskOutcome::UserError { .. }));
    assert_eq!(
        result.outcomes().iter().filter(|o| o.is_value()).count(),
        9
    );
    // User errors are results, not engine failures
    assert_eq!(env.backend.submissions(6), 1);
    assert!(matches!(result.values::<i64>(), Err(Error::TaskFailed { index: 6, .. })));
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        0,
        MockBehavior {
            permanent_failure: true,
            ..Default::default()
        },
    );

    let handle = env.executor.call_async("identity", 1).unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    assert_eq!(env.backend.submissions(0), 1);
    assert!(matches!(
        result.outcomes()[0],
        TaskOutcome::Failed {
            state: TaskState::FailedRuntime,
            ..
        }
    ));
}

#[tokio::test]
async fn test_execution_timeout_exhausts_retries() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        0,
        MockBehavior {
            hang: true,
            ..Default::default()
        },
    );

    let options = MapOptions {
        timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let handle = env.executor.map("identity", vec![1, 2], options).unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    assert_eq!(env.backend.submissions(0), 4);
    assert!(matches!(
        result.outcomes()[0],
        TaskOutcome::Failed {
            state: TaskState::TimedOut,
            ..
        }
    ));
    assert_eq!(result.outcomes()[1], TaskOutcome::Value { value: json!(2) });
}

#[tokio::test]
async fn test_job_timeout_reports_pending_tasks() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        2,
        MockBehavior {
            hang: true,
            ..Default::default()
        },
    );

    let handle = env
        .executor
        .map("identity", vec![1, 2, 3], MapOptions::default())
        .unwrap();
    let result = env
        .executor
        .get_result_timeout(&handle, Some(Duration::from_millis(100)))
        .await;

    match result {
        Err(Error::JobTimeout { pending, .. }) => assert_eq!(pending, 1),
        other => panic!("expected job timeout, got {:?}", other),
    }

    // Settled slots stay readable
    let partial = env.executor.partial_result(&handle).unwrap();
    assert_eq!(partial.outcomes()[0], TaskOutcome::Value { value: json!(1) });
    assert_eq!(partial.outcomes()[2], TaskOutcome::Pending);
    assert!(env.executor.status(&handle).unwrap().partial);

    env.executor.clean(&handle).await.unwrap();
}

// ─────────────────────────────────────────────────────────────────
// Reduction Tests
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_job_timeout_override_applies_to_reducers() {
    let env = TestEnvironment::new();
    // Index 2 is the reducer of a two-task map
    env.backend.set_behavior(
        2,
        MockBehavior {
            hang: true,
            ..Default::default()
        },
    );

    let options = MapReduceOptions {
        map: MapOptions {
            timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        },
        ..Default::default()
    };
    let handle = env
        .executor
        .map_reduce("identity", vec![1, 2], "sum", options)
        .unwrap();
    let outcome = env
        .executor
        .wait(&handle, ReturnWhen::AllCompleted, Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(env.backend.submissions(2), 4);
    let status = env.executor.status(&handle).unwrap();
    assert_eq!(status.tasks[2].state, TaskState::TimedOut);
}

#[tokio::test]
async fn test_failed_input_blocks_reducer() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        1,
        MockBehavior {
            reject: Some(MockRejection::Unavailable),
            ..Default::default()
        },
    );

    let handle = env
        .executor
        .map_reduce("identity", vec![1, 2, 3], "count", MapReduceOptions::default())
        .unwrap();
    let result = env.executor.get_result(&handle).await;

    match result {
        Err(Error::Reduction { dependency, .. }) => assert_eq!(dependency, 1),
        other => panic!("expected reduction error, got {:?}", other),
    }
    // The reducer never reached the backend
    assert_eq!(env.backend.submissions(3), 0);
}

#[tokio::test]
async fn test_partial_results_let_reducer_run() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        1,
        MockBehavior {
            reject: Some(MockRejection::Unavailable),
            ..Default::default()
        },
    );

    let options = MapReduceOptions {
        map: MapOptions {
            partial_results: Some(true),
            ..Default::default()
        },
        ..Default::default()
    };
    let handle = env
        .executor
        .map_reduce("identity", vec![1, 2, 3], "count", options)
        .unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    // The failed input reaches the reducer as a tagged error value
    assert_eq!(result.value::<usize>().unwrap(), 3);
}

#[tokio::test]
async fn test_user_errors_flow_into_reducer() {
    let env = TestEnvironment::new();
    let handle = env
        .executor
        .map_reduce("square", vec![json!(2), json!("x")], "sum", MapReduceOptions::default())
        .unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    // The reducer ran and raised on the embedded error
    assert!(matches!(result.outcomes()[0], TaskOutcome::UserError { .. }));
}

// ─────────────────────────────────────────────────────────────────
// Concurrency Tests
// ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_cap_holds() {
    let env = TestEnvironment::with_config(ExecutorConfig {
        max_in_flight: 50,
        ..fast_config()
    });

    let handle = env
        .executor
        .map("identity", (0..1000).collect::<Vec<i64>>(), MapOptions::default())
        .unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    assert_eq!(result.len(), 1000);
    assert!(result.all_succeeded());
    assert!(env.executor.peak_in_flight() <= 50);
    assert!(env.backend.max_active() <= 50);
    assert_eq!(env.executor.in_flight(), 0);
}

#[tokio::test]
async fn test_cap_holds_when_status_polls_fail() {
    let mock = Arc::new(MockBackend::new());
    mock.set_behavior(
        0,
        MockBehavior {
            hang: true,
            ..Default::default()
        },
    );
    let backend = Arc::new(StatusOutage { inner: mock.clone() });
    let executor = Executor::new(
        ExecutorConfig {
            max_in_flight: 1,
            ..fast_config()
        },
        backend,
        catalog(),
    )
    .unwrap();

    let handle = executor
        .map("identity", vec![1, 2], MapOptions::default())
        .unwrap();
    let result = executor.get_result(&handle).await.unwrap();

    assert_eq!(mock.submissions(0), 4);
    assert!(matches!(
        result.outcomes()[0],
        TaskOutcome::Failed {
            state: TaskState::FailedRuntime,
            ..
        }
    ));
    // Every abandoned activation was deleted before its slot was reused
    assert_eq!(mock.max_active(), 1);
    assert_eq!(mock.live_activations(), 0);
    assert_eq!(executor.peak_in_flight(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cap_shared_between_jobs() {
    let env = TestEnvironment::with_config(ExecutorConfig {
        max_in_flight: 4,
        ..fast_config()
    });

    let first = env
        .executor
        .map("identity", (0..40).collect::<Vec<i64>>(), MapOptions::default())
        .unwrap();
    let second = env
        .executor
        .map("square", (0..40).collect::<Vec<i64>>(), MapOptions::default())
        .unwrap();

    let (a, b) = tokio::join!(
        env.executor.get_result(&first),
        env.executor.get_result(&second)
    );
    assert!(a.unwrap().all_succeeded());
    assert!(b.unwrap().all_succeeded());
    assert!(env.executor.peak_in_flight() <= 4);
    assert_eq!(env.executor.jobs().len(), 2);
}

#[tokio::test]
async fn test_wait_any_completed() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        0,
        MockBehavior {
            hang: true,
            ..Default::default()
        },
    );

    let handle = env
        .executor
        .map("identity", vec![1, 2], MapOptions::default())
        .unwrap();
    let outcome = env
        .executor
        .wait(&handle, ReturnWhen::AnyCompleted, Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(!outcome.is_complete());
    assert!(outcome.done.contains(&1));
    assert!(outcome.not_done.contains(&0));

    env.executor.clean(&handle).await.unwrap();
}

// ─────────────────────────────────────────────────────────────────
// Cleanup Tests
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_clean_deletes_each_activation_once() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        2,
        MockBehavior {
            transient_failures: 1,
            ..Default::default()
        },
    );

    let handle = env
        .executor
        .map("square", vec![1, 2, 3, 4], MapOptions::default())
        .unwrap();
    env.executor.get_result(&handle).await.unwrap();

    let first = env.executor.clean(&handle).await.unwrap();
    assert!(!first.already_clean);
    assert_eq!(first.failed, 0);
    assert_eq!(first.deleted, env.backend.activation_ids().len());

    let second = env.executor.clean(&handle).await.unwrap();
    assert!(second.already_clean);
    assert_eq!(second.deleted, 0);

    let counts = env.backend.delete_counts();
    assert!(!counts.is_empty());
    assert!(counts.values().all(|&n| n == 1));
    assert_eq!(env.backend.live_activations(), 0);

    assert!(matches!(
        env.executor.get_result(&handle).await,
        Err(Error::JobCleaned { .. })
    ));
    assert!(env.executor.jobs().is_empty());
}

#[tokio::test]
async fn test_clean_cancels_running_job() {
    let env = TestEnvironment::new();
    env.backend.set_behavior(
        0,
        MockBehavior {
            hang: true,
            ..Default::default()
        },
    );

    let handle = env.executor.call_async("identity", 1).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let snapshot = env
        .executor
        .wait(&handle, ReturnWhen::Always, None)
        .await
        .unwrap();
    assert_eq!(snapshot.not_done, vec![0]);
    assert_eq!(env.backend.submissions(0), 1);

    let report = env.executor.clean(&handle).await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(env.backend.live_activations(), 0);

    // No resubmission after cancellation
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(env.backend.submissions(0), 1);
}

// ─────────────────────────────────────────────────────────────────
// Storage Input Tests
// ─────────────────────────────────────────────────────────────────

fn object_store() -> MemoryObjectStore {
    let store = MemoryObjectStore::new(2);
    store.insert("logs/a.txt", 250);
    store.insert("logs/b.txt", 50);
    store.insert("logs/c.txt", 40);
    store.insert("other/skip.txt", 10);
    store
}

#[tokio::test]
async fn test_map_objects_covers_every_byte() {
    let env = TestEnvironment::new();
    let store = object_store();
    let discovery = DiscoveryOptions {
        chunk_bytes: Some(100),
        ..Default::default()
    };

    let handle = env
        .executor
        .map_objects("identity", &store, "logs/", discovery, MapOptions::default())
        .await
        .unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    let mut bytes = 0;
    for value in result.raw_values().unwrap() {
        for slice in value["source"]["slices"].as_array().unwrap() {
            assert!(slice["key"].as_str().unwrap().starts_with("logs/"));
            bytes += slice["end"].as_u64().unwrap() - slice["start"].as_u64().unwrap();
        }
    }
    assert_eq!(bytes, 340);
    assert!(store.pages_served() >= 2);
}

#[tokio::test]
async fn test_map_reduce_objects_per_object() {
    let env = TestEnvironment::new();
    let store = object_store();
    let discovery = DiscoveryOptions {
        chunk_bytes: Some(100),
        ..Default::default()
    };
    let options = MapReduceOptions {
        reducer: ReducerGrouping::PerObject,
        ..Default::default()
    };

    let handle = env
        .executor
        .map_reduce_objects("identity", &store, "logs/", discovery, "count", options)
        .await
        .unwrap();
    let result = env.executor.get_result(&handle).await.unwrap();

    // a.txt spans three ranges; b.txt and c.txt are never packed together
    assert_eq!(result.values::<usize>().unwrap(), vec![3, 1, 1]);
}

#[tokio::test]
async fn test_map_objects_empty_prefix() {
    let env = TestEnvironment::new();
    let store = object_store();
    let result = env
        .executor
        .map_objects(
            "identity",
            &store,
            "missing/",
            DiscoveryOptions::default(),
            MapOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(Error::Partition { .. })));
}

// ─────────────────────────────────────────────────────────────────
// Local Backend Tests
// ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_backend_end_to_end() {
    let backend = Arc::new(LocalBackend::new(catalog(), 4));
    let executor = Executor::new(fast_config(), backend, catalog()).unwrap();

    // Longer sleeps first so completion order differs from input order
    let handle = executor
        .map("sleep", vec![40, 5, 20, 1], MapOptions::default())
        .unwrap();
    let result = executor.get_result(&handle).await.unwrap();
    assert_eq!(result.values::<u64>().unwrap(), vec![40, 5, 20, 1]);

    let reduce = executor
        .map_reduce("square", vec![1, 2, 3], "sum", MapReduceOptions::default())
        .unwrap();
    assert_eq!(executor.get_result(&reduce).await.unwrap().value::<i64>().unwrap(), 14);

    executor.clean(&handle).await.unwrap();
    executor.clean(&reduce).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_backend_captures_panics() {
    let backend = Arc::new(LocalBackend::new(catalog(), 2));
    let executor = Executor::new(fast_config(), backend, catalog()).unwrap();

    let handle = executor.call_async("panic", "boom").unwrap();
    let result = executor.get_result(&handle).await.unwrap();

    match &result.outcomes()[0] {
        TaskOutcome::UserError { error } => assert_eq!(error.kind, "panic"),
        other => panic!("unexpected outcome {:?}", other),
    }
}
