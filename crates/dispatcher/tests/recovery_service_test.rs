use std::sync::Arc;

use analysis_domain::{DatasetJobRepository, ResultStatus};
use analysis_dispatcher::{RecoveryService, SystemRecoveryService};
use analysis_testing_utils::{DatasetJobBuilder, JobBuilder, MockDatasetJobRepository, MockJobRepository};

#[tokio::test]
async fn test_recover_interrupted_state() {
    let jobs = Arc::new(MockJobRepository::with_jobs(vec![
        JobBuilder::new()
            .with_id(1)
            .with_result_status(ResultStatus::Running)
            .build(),
        JobBuilder::new().with_id(2).with_ingest_handle("lost-handle").build(),
        JobBuilder::new()
            .with_id(3)
            .with_result_status(ResultStatus::Completed)
            .with_ingest_handle("done-handle")
            .build(),
    ]));
    let dataset_jobs = Arc::new(MockDatasetJobRepository::new());
    let pending = dataset_jobs
        .create(&DatasetJobBuilder::ingest(2).build())
        .await
        .unwrap();
    let running = dataset_jobs
        .create(&DatasetJobBuilder::ingest(1).build())
        .await
        .unwrap();
    dataset_jobs
        .update_status(running.id, ResultStatus::None, ResultStatus::Running, None)
        .await
        .unwrap();
    let finished = dataset_jobs
        .create(&DatasetJobBuilder::ingest(3).build())
        .await
        .unwrap();
    dataset_jobs
        .update_status(finished.id, ResultStatus::None, ResultStatus::Running, None)
        .await
        .unwrap();
    dataset_jobs
        .update_status(finished.id, ResultStatus::Running, ResultStatus::Completed, None)
        .await
        .unwrap();

    let service = SystemRecoveryService::new(jobs.clone(), dataset_jobs.clone());
    let report = service.recover_system_state().await.unwrap();

    assert_eq!(report.failed_units, vec![pending.id, running.id]);
    assert_eq!(report.failed_jobs, vec![1]);
    assert_eq!(report.requeued_jobs, vec![2]);
    assert!(report.errors.is_empty());

    assert_eq!(dataset_jobs.get(pending.id).unwrap().status, ResultStatus::Failed);
    assert_eq!(dataset_jobs.get(finished.id).unwrap().status, ResultStatus::Completed);
    assert_eq!(jobs.get(1).unwrap().result_status, ResultStatus::Failed);
    assert!(jobs.get(2).unwrap().ingest_handle.is_none());
    assert_eq!(jobs.get(3).unwrap().ingest_handle.as_deref(), Some("done-handle"));
    assert!(dataset_jobs.find_active().await.unwrap().is_empty());
}
