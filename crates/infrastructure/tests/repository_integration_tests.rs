use analysis_core::PipelineError;
use analysis_domain::{
    AnalysisKind, ClusterItem, DatasetJob, DatasetJobKind, DatasetJobRepository,
    DatasetRepository, ImageRepository, Job, JobRepository, LabelRepository, Neighbor,
    OutlierRecord, ResultRepository, ResultStatus, SimilarRecord,
};
use analysis_infrastructure::DatabaseManager;
use anyhow::Result;
use chrono::Utc;

async fn seeded() -> Result<(DatabaseManager, i64)> {
    let db = DatabaseManager::in_memory().await?;
    let dataset = db.dataset_repository().create_dataset("cells").await?;
    db.image_repository()
        .insert_paths(
            dataset.id,
            &[
                "raw/b.tif".to_string(),
                "raw/a.tif".to_string(),
                "raw/c.tif".to_string(),
            ],
        )
        .await?;
    Ok((db, dataset.id))
}

fn new_job(dataset_id: i64) -> Job {
    Job::new(
        dataset_id,
        AnalysisKind::Clustering,
        serde_json::json!({"app": "hdbscan"}),
        serde_json::json!({"job_id": "r-1"}),
        "r-1".to_string(),
    )
}

#[tokio::test]
async fn test_job_lifecycle_with_guarded_status_updates() -> Result<()> {
    let (db, dataset_id) = seeded().await?;
    let repo = db.job_repository();

    let created = repo.create(&new_job(dataset_id)).await?;
    assert!(created.id > 0);
    assert_eq!(created.result_status, ResultStatus::None);
    assert_eq!(created.request["app"], "hdbscan");

    let unprocessed = repo.find_unprocessed().await?;
    assert_eq!(unprocessed.len(), 1);

    repo.update_remote_state(created.id, "RUNNING", Some("busy"))
        .await?;
    repo.record_ingest_enqueued(created.id, "handle-1", Utc::now())
        .await?;
    let stored = repo.find_by_id(created.id).await?.unwrap();
    assert_eq!(stored.remote_state.as_deref(), Some("RUNNING"));
    assert_eq!(stored.ingest_handle.as_deref(), Some("handle-1"));
    assert!(stored.finished_at.is_some());
    assert!(!stored.awaiting_ingest());

    repo.update_result_status(created.id, ResultStatus::None, ResultStatus::Running, None)
        .await?;

    // 前置状态不符时拒绝写入
    let stale = repo
        .update_result_status(created.id, ResultStatus::None, ResultStatus::Running, None)
        .await;
    assert!(matches!(
        stale,
        Err(PipelineError::InvalidStatusTransition { .. })
    ));

    repo.update_result_status(
        created.id,
        ResultStatus::Running,
        ResultStatus::Failed,
        Some("boom"),
    )
    .await?;
    let failed = repo.find_by_id(created.id).await?.unwrap();
    assert_eq!(failed.result_status, ResultStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("boom"));

    repo.reset_for_reprocess(created.id).await?;
    let reset = repo.find_by_id(created.id).await?.unwrap();
    assert_eq!(reset.result_status, ResultStatus::None);
    assert!(reset.ingest_handle.is_none());
    assert!(reset.error_message.is_none());
    assert!(reset.awaiting_ingest());

    // 非终态作业不能重置
    assert!(repo.reset_for_reprocess(created.id).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_missing_job_reports_not_found() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let repo = db.job_repository();

    assert!(repo.find_by_id(99).await?.is_none());
    let err = repo
        .update_result_status(99, ResultStatus::None, ResultStatus::Running, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::JobNotFound { id: 99 }));
    Ok(())
}

#[tokio::test]
async fn test_dataset_job_exclusivity_and_timestamps() -> Result<()> {
    let (db, dataset_id) = seeded().await?;
    let job = db.job_repository().create(&new_job(dataset_id)).await?;
    let repo = db.dataset_job_repository();

    let unit = repo
        .create(&DatasetJob::new(
            dataset_id,
            DatasetJobKind::IngestOutput,
            Some(job.id),
            serde_json::json!({}),
        ))
        .await?;
    assert!(repo.has_active(dataset_id, DatasetJobKind::IngestOutput, Some(job.id)).await?);
    assert!(!repo.has_active(dataset_id, DatasetJobKind::IngestOutput, None).await?);
    assert!(!repo.has_active(dataset_id, DatasetJobKind::SubmitAnalysis, Some(job.id)).await?);

    repo.set_scheduler_handle(unit.id, "h-1").await?;
    repo.update_status(unit.id, ResultStatus::None, ResultStatus::Running, None)
        .await?;
    let running = repo.find_by_id(unit.id).await?.unwrap();
    assert_eq!(running.scheduler_handle.as_deref(), Some("h-1"));
    assert!(running.started_at.is_some());
    assert!(running.finished_at.is_none());

    repo.update_status(unit.id, ResultStatus::Running, ResultStatus::Completed, None)
        .await?;
    let done = repo.find_by_id(unit.id).await?.unwrap();
    assert!(done.finished_at.is_some());
    assert!(!repo.has_active(dataset_id, DatasetJobKind::IngestOutput, Some(job.id)).await?);
    assert!(repo.find_active().await?.is_empty());

    // 终态不可回退
    assert!(repo
        .update_status(unit.id, ResultStatus::Completed, ResultStatus::Running, None)
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn test_image_lookup_by_path_and_name() -> Result<()> {
    let (db, dataset_id) = seeded().await?;
    let repo = db.image_repository();

    let ordered = repo.list_ordered(dataset_id).await?;
    let paths: Vec<_> = ordered.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec!["raw/a.tif", "raw/b.tif", "raw/c.tif"]);

    let by_path = repo
        .find_by_paths(dataset_id, &["raw/c.tif".to_string(), "nope".to_string()])
        .await?;
    assert_eq!(by_path.len(), 1);
    assert_eq!(by_path[0].name, "c");

    let by_name = repo
        .find_by_names(dataset_id, &["a".to_string(), "b".to_string()])
        .await?;
    assert_eq!(by_name.len(), 2);

    // 重复登记被忽略
    let inserted = repo
        .insert_paths(dataset_id, &["raw/a.tif".to_string()])
        .await?;
    assert_eq!(inserted, 0);
    Ok(())
}

#[tokio::test]
async fn test_label_find_or_create_is_idempotent() -> Result<()> {
    let (db, dataset_id) = seeded().await?;
    let repo = db.label_repository();

    let first = repo.find_or_create(dataset_id, "mitosis", "#ff0000").await?;
    let second = repo.find_or_create(dataset_id, "mitosis", "#00ff00").await?;
    assert_eq!(first.id, second.id);
    assert_eq!(second.color, "#ff0000");
    Ok(())
}

#[tokio::test]
async fn test_display_mode_lookup() -> Result<()> {
    let (db, dataset_id) = seeded().await?;
    let datasets = db.dataset_repository();
    let mode = datasets
        .create_display_mode(dataset_id, "thumbs", "png", "thumbs", false)
        .await?;

    let found = datasets.find_display_mode(mode.id).await?.unwrap();
    assert!(!found.is_source_format);
    assert_eq!(found.extension, "png");
    assert!(datasets.find_by_id(dataset_id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_results_are_replaced_not_appended() -> Result<()> {
    let (db, dataset_id) = seeded().await?;
    let job = db.job_repository().create(&new_job(dataset_id)).await?;
    let images = db.image_repository().list_ordered(dataset_id).await?;
    let results = db.result_repository();

    for _ in 0..2 {
        results.clear_results(job.id, AnalysisKind::Clustering).await?;
        let noise = results.create_cluster(job.id, -1, "Cluster -1").await?;
        results
            .insert_cluster_items(&[ClusterItem {
                cluster_id: noise.id,
                image_id: images[0].id,
                probability: 0.0,
                outlier_score: 0.7,
            }])
            .await?;
    }

    let clusters = results.find_clusters(job.id).await?;
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].cluster.cluster_index, -1);
    assert_eq!(clusters[0].size, 1);

    results
        .insert_outliers(&[OutlierRecord {
            job_id: job.id,
            image_id: images[1].id,
            is_outlier: true,
            score: 0.9,
        }])
        .await?;
    results
        .insert_similars(&[SimilarRecord {
            job_id: job.id,
            image_id: images[2].id,
            neighbors: vec![Neighbor {
                image_id: Some(images[0].id),
                path: images[0].path.clone(),
                score: 0.8,
            }],
            highest_score: 0.8,
        }])
        .await?;

    assert_eq!(results.find_outliers(job.id).await?.len(), 1);
    let similars = results.find_similars(job.id).await?;
    assert_eq!(similars[0].neighbors[0].path, "raw/a.tif");

    assert_eq!(
        results
            .clear_results(job.id, AnalysisKind::OutlierDetection)
            .await?,
        1
    );
    assert!(results.find_outliers(job.id).await?.is_empty());
    Ok(())
}
