use std::sync::Arc;
use std::time::Duration;

use analysis_core::{PipelineError, PipelineResult, WorkerConfig};
use analysis_domain::{
    DatasetJob, DatasetJobKind, DatasetJobRepository, JobEnqueueService, ResultStatus,
};
use analysis_infrastructure::InMemoryTaskQueue;
use analysis_testing_utils::{DatasetJobBuilder, MockDatasetJobRepository, TestEnv};
use analysis_worker::{ExecutionOutcome, HandlerRegistry, JobExecutor, UnitHandler, WorkerService};
use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

// Mock处理器，记录被调用的单元
#[derive(Debug)]
struct MockHandler {
    kind: DatasetJobKind,
    should_succeed: bool,
    delay_ms: u64,
    calls: Arc<Mutex<Vec<i64>>>,
}

impl MockHandler {
    fn new(kind: DatasetJobKind, should_succeed: bool) -> Self {
        Self {
            kind,
            should_succeed,
            delay_ms: 0,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    async fn calls(&self) -> Vec<i64> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl UnitHandler for MockHandler {
    fn kind(&self) -> DatasetJobKind {
        self.kind
    }

    async fn handle(&self, unit: &DatasetJob) -> PipelineResult<()> {
        self.calls.lock().await.push(unit.id);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.should_succeed {
            Ok(())
        } else {
            Err(PipelineError::Network("模拟网络故障".to_string()))
        }
    }
}

async fn setup(handler: Arc<MockHandler>) -> (Arc<MockDatasetJobRepository>, JobExecutor) {
    let repo = Arc::new(MockDatasetJobRepository::new());
    let registry = HandlerRegistry::new().register(handler);
    let executor = JobExecutor::new(repo.clone(), registry);
    (repo, executor)
}

#[tokio::test]
async fn test_successful_unit_completes() {
    let handler = Arc::new(MockHandler::new(DatasetJobKind::IngestOutput, true));
    let (repo, executor) = setup(handler.clone()).await;
    let unit = repo
        .create(&DatasetJobBuilder::ingest(7).build())
        .await
        .unwrap();

    let outcome = executor.execute(unit.id).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Completed);

    let stored = repo.get(unit.id).unwrap();
    assert_eq!(stored.status, ResultStatus::Completed);
    assert!(stored.started_at.is_some());
    assert!(stored.finished_at.is_some());
    assert_eq!(handler.calls().await, vec![unit.id]);
}

#[tokio::test]
async fn test_failure_is_persisted_before_error_returns() {
    let handler = Arc::new(MockHandler::new(DatasetJobKind::IngestOutput, false));
    let (repo, executor) = setup(handler).await;
    let unit = repo
        .create(&DatasetJobBuilder::ingest(7).build())
        .await
        .unwrap();

    let err = executor.execute(unit.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Network(_)));

    let stored = repo.get(unit.id).unwrap();
    assert_eq!(stored.status, ResultStatus::Failed);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .contains("模拟网络故障"));
    assert!(stored.finished_at.is_some());
}

#[tokio::test]
async fn test_terminal_unit_is_skipped() {
    let handler = Arc::new(MockHandler::new(DatasetJobKind::IngestOutput, true));
    let (repo, executor) = setup(handler.clone()).await;
    let unit = repo
        .create(
            &DatasetJobBuilder::ingest(7)
                .with_status(ResultStatus::Completed)
                .build(),
        )
        .await
        .unwrap();

    let outcome = executor.execute(unit.id).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Skipped);
    assert!(handler.calls().await.is_empty());
}

#[tokio::test]
async fn test_unit_without_handler_fails() {
    let handler = Arc::new(MockHandler::new(DatasetJobKind::IngestOutput, true));
    let (repo, executor) = setup(handler).await;
    let unit = repo
        .create(&DatasetJobBuilder::new(DatasetJobKind::SubmitAnalysis).build())
        .await
        .unwrap();

    assert!(executor.execute(unit.id).await.is_err());
    assert_eq!(repo.get(unit.id).unwrap().status, ResultStatus::Failed);
}

#[tokio::test]
async fn test_missing_unit_is_not_found() {
    let handler = Arc::new(MockHandler::new(DatasetJobKind::IngestOutput, true));
    let (_repo, executor) = setup(handler).await;

    let err = executor.execute(404).await.unwrap_err();
    assert!(matches!(err, PipelineError::DatasetJobNotFound { id: 404 }));
}

#[tokio::test]
async fn test_worker_service_runs_queued_units_and_stops() {
    let handler = Arc::new(MockHandler::new(DatasetJobKind::IngestOutput, true).with_delay(10));
    let repo = Arc::new(MockDatasetJobRepository::new());
    let executor = Arc::new(JobExecutor::new(
        repo.clone(),
        HandlerRegistry::new().register(handler.clone()),
    ));

    let queue = Arc::new(InMemoryTaskQueue::new());
    let receiver = queue.take_receiver().await.unwrap();
    let enqueue = JobEnqueueService::new(repo.clone(), queue.clone());

    let config = WorkerConfig {
        max_concurrent_jobs: 2,
        ..WorkerConfig::default()
    };
    let service = WorkerService::new(executor, &config);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = tokio::spawn(async move { service.run(receiver, shutdown_rx).await });

    for job_id in 1..=3 {
        enqueue
            .enqueue(1, DatasetJobKind::IngestOutput, Some(job_id), serde_json::json!({}))
            .await
            .unwrap();
    }

    let repo_probe = repo.clone();
    let done = TestEnv::wait_for(
        || {
            let repo = repo_probe.clone();
            async move {
                repo.all()
                    .iter()
                    .all(|u| u.status == ResultStatus::Completed)
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(done);
    assert_eq!(handler.calls().await.len(), 3);

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap().unwrap();
}
