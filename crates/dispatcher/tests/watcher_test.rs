use std::sync::Arc;
use std::time::Duration;

use analysis_core::{PipelineError, WatcherConfig};
use analysis_domain::{DatasetJobKind, JobEnqueueService, JobRepository, ResultStatus};
use analysis_dispatcher::{JobWatcher, WatchReport};
use analysis_testing_utils::{
    JobBuilder, MockAnalysisService, MockDatasetJobRepository, MockJobRepository, MockTaskQueue,
    StatusFailure,
};
use tokio::sync::broadcast;

struct Fixture {
    jobs: Arc<MockJobRepository>,
    dataset_jobs: Arc<MockDatasetJobRepository>,
    queue: Arc<MockTaskQueue>,
    analysis: Arc<MockAnalysisService>,
    watcher: JobWatcher,
}

fn fixture(jobs: MockJobRepository) -> Fixture {
    let jobs = Arc::new(jobs);
    let dataset_jobs = Arc::new(MockDatasetJobRepository::new());
    let queue = Arc::new(MockTaskQueue::new());
    let analysis = Arc::new(MockAnalysisService::new());
    let enqueue = Arc::new(JobEnqueueService::new(dataset_jobs.clone(), queue.clone()));
    let config = WatcherConfig {
        enabled: true,
        poll_interval_seconds: 1,
    };
    let watcher = JobWatcher::new(jobs.clone(), analysis.clone(), enqueue, &config);
    Fixture {
        jobs,
        dataset_jobs,
        queue,
        analysis,
        watcher,
    }
}

fn three_jobs() -> MockJobRepository {
    MockJobRepository::with_jobs(vec![
        JobBuilder::new().with_id(1).with_remote_id("r-running").build(),
        JobBuilder::new().with_id(2).with_remote_id("r-success").build(),
        JobBuilder::new().with_id(3).with_remote_id("r-failed").build(),
    ])
}

#[tokio::test]
async fn test_terminal_jobs_are_enqueued_once() {
    let f = fixture(three_jobs());
    f.analysis.script_states("r-running", &["RUNNING"]);
    f.analysis.script_states("r-success", &["SUCCESS"]);
    f.analysis.script_states("r-failed", &["FAILED"]);

    let report = f.watcher.poll_once().await.unwrap();
    assert_eq!(
        report,
        WatchReport {
            checked: 3,
            still_running: 1,
            enqueued: 2,
            errors: 0,
        }
    );

    let enqueued = f.queue.enqueued();
    assert_eq!(enqueued.len(), 2);
    assert!(enqueued
        .iter()
        .all(|unit| unit.kind == DatasetJobKind::IngestOutput));

    let running = f.jobs.get(1).unwrap();
    assert!(running.finished_at.is_none());
    assert!(running.ingest_handle.is_none());
    assert_eq!(running.remote_state.as_deref(), Some("RUNNING"));

    let succeeded = f.jobs.get(2).unwrap();
    assert!(succeeded.finished_at.is_some());
    assert_eq!(succeeded.ingest_handle.as_deref(), Some("mock-handle-1"));
    assert_eq!(succeeded.remote_state.as_deref(), Some("SUCCESS"));

    let failed = f.jobs.get(3).unwrap();
    assert_eq!(failed.remote_state.as_deref(), Some("FAILED"));
    assert!(failed.ingest_handle.is_some());

    // 第二轮不重复入队
    let report = f.watcher.poll_once().await.unwrap();
    assert_eq!(report.enqueued, 0);
    assert_eq!(f.queue.enqueued().len(), 2);
    assert_eq!(f.dataset_jobs.all().len(), 2);
}

#[tokio::test]
async fn test_status_error_does_not_stop_iteration() {
    let f = fixture(three_jobs());
    f.analysis
        .fail_status("r-running", StatusFailure::Network("connection reset".to_string()));
    f.analysis
        .fail_status("r-success", StatusFailure::Api(500, "boom".to_string()));
    f.analysis.script_states("r-failed", &["FAILED"]);

    let report = f.watcher.poll_once().await.unwrap();
    assert_eq!(report.errors, 2);
    assert_eq!(report.enqueued, 1);
    assert_eq!(f.analysis.status_calls().len(), 3);
}

#[tokio::test]
async fn test_processed_jobs_are_not_polled() {
    let f = fixture(MockJobRepository::with_jobs(vec![
        JobBuilder::new()
            .with_id(1)
            .with_remote_id("r-1")
            .with_result_status(ResultStatus::Completed)
            .build(),
        JobBuilder::new().with_id(2).without_remote_id().build(),
    ]));

    let report = f.watcher.poll_once().await.unwrap();
    assert_eq!(report.checked, 0);
    assert!(f.analysis.status_calls().is_empty());
}

#[tokio::test]
async fn test_enqueue_failure_leaves_job_pending() {
    let f = fixture(three_jobs());
    f.analysis.script_states("r-running", &["RUNNING"]);
    f.analysis.script_states("r-success", &["SUCCESS"]);
    f.analysis.script_states("r-failed", &["FAILED"]);
    f.queue.set_fail_enqueue(true);

    let report = f.watcher.poll_once().await.unwrap();
    assert_eq!(report.errors, 2);
    let job = f.jobs.get(2).unwrap();
    assert!(job.ingest_handle.is_none());
    assert!(job.finished_at.is_none());
}

#[tokio::test]
async fn test_enqueue_failure_is_retried_on_next_poll() {
    let f = fixture(three_jobs());
    f.analysis.script_states("r-running", &["RUNNING"]);
    f.analysis.script_states("r-success", &["SUCCESS"]);
    f.analysis.script_states("r-failed", &["FAILED"]);

    f.queue.set_fail_enqueue(true);
    assert_eq!(f.watcher.poll_once().await.unwrap().errors, 2);
    assert!(f
        .dataset_jobs
        .all()
        .iter()
        .all(|unit| unit.status == ResultStatus::Failed));

    f.queue.set_fail_enqueue(false);
    let report = f.watcher.poll_once().await.unwrap();
    assert_eq!(report.enqueued, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(f.queue.enqueued().len(), 2);
    assert!(f.jobs.get(2).unwrap().ingest_handle.is_some());
    assert!(f.jobs.get(3).unwrap().ingest_handle.is_some());
}

#[tokio::test]
async fn test_state_progression_across_polls() {
    let f = fixture(MockJobRepository::with_jobs(vec![JobBuilder::new()
        .with_id(1)
        .with_remote_id("r-1")
        .build()]));
    f.analysis
        .script_states("r-1", &["PENDING", "RUNNING", "SUCCESS"]);

    assert_eq!(f.watcher.poll_once().await.unwrap().still_running, 1);
    assert_eq!(f.watcher.poll_once().await.unwrap().still_running, 1);
    assert_eq!(f.watcher.poll_once().await.unwrap().enqueued, 1);

    let job = f.jobs.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(job.remote_state.as_deref(), Some("SUCCESS"));
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let f = fixture(MockJobRepository::new());
    let watcher = Arc::new(f.watcher);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let running = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run(shutdown_rx).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("监视器未在超时内停止")
        .unwrap();
}

#[tokio::test]
async fn test_active_ingest_unit_is_not_duplicated() {
    let f = fixture(MockJobRepository::with_jobs(vec![JobBuilder::new()
        .with_id(5)
        .with_remote_id("r-5")
        .build()]));
    f.analysis.script_states("r-5", &["SUCCESS"]);

    let enqueue = JobEnqueueService::new(f.dataset_jobs.clone(), f.queue.clone());
    enqueue
        .enqueue(1, DatasetJobKind::IngestOutput, Some(5), serde_json::json!({"job_id": 5}))
        .await
        .unwrap();
    let err = enqueue
        .enqueue(1, DatasetJobKind::IngestOutput, Some(5), serde_json::json!({"job_id": 5}))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyActive { .. }));

    let report = f.watcher.poll_once().await.unwrap();
    assert_eq!(report.enqueued, 0);
    assert_eq!(report.errors, 0);
    assert_eq!(f.queue.enqueued().len(), 1);
}
