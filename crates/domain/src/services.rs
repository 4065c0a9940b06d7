//! # 领域服务模块
//!
//! 不属于单个实体的业务规则：单元入队前的互斥检查，以及结果路径到图像的批量解析。

use crate::entities::{DatasetJob, DatasetJobKind, ResultStatus};
use crate::identity::{ImageIdentity, ImageLookupKey};
use crate::ports::{QueuedUnit, TaskQueue};
use crate::repositories::{DatasetJobRepository, ImageRepository};
use analysis_core::{PipelineError, PipelineResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 工作单元入队服务
pub struct JobEnqueueService {
    dataset_jobs: Arc<dyn DatasetJobRepository>,
    queue: Arc<dyn TaskQueue>,
}

impl JobEnqueueService {
    pub fn new(dataset_jobs: Arc<dyn DatasetJobRepository>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            dataset_jobs,
            queue,
        }
    }

    /// 创建状态为 None 的单元并入队，返回带调度句柄的单元
    pub async fn enqueue(
        &self,
        dataset_id: i64,
        kind: DatasetJobKind,
        job_id: Option<i64>,
        parameters: serde_json::Value,
    ) -> PipelineResult<DatasetJob> {
        if kind.is_exclusive() && self.dataset_jobs.has_active(dataset_id, kind, job_id).await? {
            return Err(PipelineError::AlreadyActive {
                dataset_id,
                kind: kind.to_string(),
            });
        }

        let mut unit = self
            .dataset_jobs
            .create(&DatasetJob::new(dataset_id, kind, job_id, parameters))
            .await?;

        let handle = match self
            .queue
            .enqueue(QueuedUnit {
                dataset_job_id: unit.id,
                kind,
            })
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                // 未入队的单元不能继续占用互斥位
                self.fail_unqueued(&unit, &e).await;
                return Err(e);
            }
        };
        self.dataset_jobs
            .set_scheduler_handle(unit.id, &handle)
            .await?;
        unit.scheduler_handle = Some(handle);

        info!("已入队: {}", unit.entity_description());
        Ok(unit)
    }

    async fn fail_unqueued(&self, unit: &DatasetJob, cause: &PipelineError) {
        let message = format!("入队失败: {cause}");
        let result = async {
            self.dataset_jobs
                .update_status(unit.id, ResultStatus::None, ResultStatus::Running, None)
                .await?;
            self.dataset_jobs
                .update_status(
                    unit.id,
                    ResultStatus::Running,
                    ResultStatus::Failed,
                    Some(&message),
                )
                .await
        }
        .await;

        if let Err(e) = result {
            warn!("标记 {} 为失败时出错: {}", unit.entity_description(), e);
        }
    }
}

/// 将结果条目路径批量解析为图像ID
pub struct ImageResolver {
    images: Arc<dyn ImageRepository>,
    identity: ImageIdentity,
    dataset_id: i64,
}

impl ImageResolver {
    pub fn new(images: Arc<dyn ImageRepository>, identity: ImageIdentity, dataset_id: i64) -> Self {
        Self {
            images,
            identity,
            dataset_id,
        }
    }

    pub fn identity(&self) -> &ImageIdentity {
        &self.identity
    }

    /// 返回 条目路径 -> 图像ID，无法解析的路径不出现在结果中
    pub async fn resolve(&self, item_paths: &[String]) -> PipelineResult<HashMap<String, i64>> {
        if item_paths.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<ImageLookupKey> = item_paths
            .iter()
            .map(|p| self.identity.lookup_key(p))
            .collect();
        let values: Vec<String> = keys.iter().map(|k| k.value().to_string()).collect();

        let images = match self.identity {
            ImageIdentity::Path => self.images.find_by_paths(self.dataset_id, &values).await?,
            ImageIdentity::ProjectedPath { .. } => {
                self.images.find_by_names(self.dataset_id, &values).await?
            }
        };

        let by_key: HashMap<ImageLookupKey, i64> = images
            .iter()
            .map(|image| (self.identity.key_of(image), image.id))
            .collect();

        let resolved: HashMap<String, i64> = item_paths
            .iter()
            .zip(keys.iter())
            .filter_map(|(path, key)| by_key.get(key).map(|id| (path.clone(), *id)))
            .collect();

        debug!(
            "解析图像路径: 请求 {}, 命中 {}",
            item_paths.len(),
            resolved.len()
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Image, ResultStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDatasetJobs {
        units: Mutex<Vec<DatasetJob>>,
    }

    #[async_trait]
    impl DatasetJobRepository for FakeDatasetJobs {
        async fn create(&self, dataset_job: &DatasetJob) -> PipelineResult<DatasetJob> {
            let mut units = self.units.lock().unwrap();
            let mut created = dataset_job.clone();
            created.id = units.len() as i64 + 1;
            units.push(created.clone());
            Ok(created)
        }

        async fn find_by_id(&self, id: i64) -> PipelineResult<Option<DatasetJob>> {
            Ok(self.units.lock().unwrap().iter().find(|u| u.id == id).cloned())
        }

        async fn find_active(&self) -> PipelineResult<Vec<DatasetJob>> {
            Ok(self
                .units
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.is_active())
                .cloned()
                .collect())
        }

        async fn has_active(
            &self,
            dataset_id: i64,
            kind: DatasetJobKind,
            job_id: Option<i64>,
        ) -> PipelineResult<bool> {
            Ok(self.units.lock().unwrap().iter().any(|u| {
                u.dataset_id == dataset_id && u.kind == kind && u.job_id == job_id && u.is_active()
            }))
        }

        async fn set_scheduler_handle(&self, id: i64, handle: &str) -> PipelineResult<()> {
            let mut units = self.units.lock().unwrap();
            if let Some(unit) = units.iter_mut().find(|u| u.id == id) {
                unit.scheduler_handle = Some(handle.to_string());
            }
            Ok(())
        }

        async fn update_status(
            &self,
            id: i64,
            _from: ResultStatus,
            to: ResultStatus,
            _error_message: Option<&str>,
        ) -> PipelineResult<()> {
            let mut units = self.units.lock().unwrap();
            if let Some(unit) = units.iter_mut().find(|u| u.id == id) {
                unit.status = to;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeQueue {
        queued: Mutex<Vec<QueuedUnit>>,
        failing: Mutex<bool>,
    }

    #[async_trait]
    impl TaskQueue for FakeQueue {
        async fn enqueue(&self, unit: QueuedUnit) -> PipelineResult<String> {
            if *self.failing.lock().unwrap() {
                return Err(PipelineError::Internal("queue closed".to_string()));
            }
            let mut queued = self.queued.lock().unwrap();
            queued.push(unit);
            Ok(format!("handle-{}", queued.len()))
        }

        async fn pending(&self) -> PipelineResult<usize> {
            Ok(self.queued.lock().unwrap().len())
        }
    }

    struct FakeImages {
        images: Vec<Image>,
    }

    #[async_trait]
    impl ImageRepository for FakeImages {
        async fn list_ordered(&self, _dataset_id: i64) -> PipelineResult<Vec<Image>> {
            Ok(self.images.clone())
        }

        async fn find_by_paths(&self, _dataset_id: i64, paths: &[String]) -> PipelineResult<Vec<Image>> {
            Ok(self
                .images
                .iter()
                .filter(|i| paths.contains(&i.path))
                .cloned()
                .collect())
        }

        async fn find_by_names(&self, _dataset_id: i64, names: &[String]) -> PipelineResult<Vec<Image>> {
            Ok(self
                .images
                .iter()
                .filter(|i| names.contains(&i.name))
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_enqueue_records_handle() {
        let repo = Arc::new(FakeDatasetJobs::default());
        let queue = Arc::new(FakeQueue::default());
        let service = JobEnqueueService::new(repo.clone(), queue.clone());

        let unit = service
            .enqueue(1, DatasetJobKind::IngestOutput, Some(5), serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(unit.scheduler_handle.as_deref(), Some("handle-1"));
        assert_eq!(unit.status, ResultStatus::None);
        let stored = repo.find_by_id(unit.id).await.unwrap().unwrap();
        assert_eq!(stored.scheduler_handle.as_deref(), Some("handle-1"));
        assert_eq!(queue.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_second_active_ingest_for_same_job() {
        let repo = Arc::new(FakeDatasetJobs::default());
        let queue = Arc::new(FakeQueue::default());
        let service = JobEnqueueService::new(repo, queue.clone());

        service
            .enqueue(1, DatasetJobKind::IngestOutput, Some(5), serde_json::json!({}))
            .await
            .unwrap();
        let second = service
            .enqueue(1, DatasetJobKind::IngestOutput, Some(5), serde_json::json!({}))
            .await;

        assert!(matches!(second, Err(PipelineError::AlreadyActive { .. })));
        assert_eq!(queue.pending().await.unwrap(), 1);

        // 另一个作业不受影响
        service
            .enqueue(1, DatasetJobKind::IngestOutput, Some(6), serde_json::json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_failure_releases_exclusive_slot() {
        let repo = Arc::new(FakeDatasetJobs::default());
        let queue = Arc::new(FakeQueue::default());
        let service = JobEnqueueService::new(repo.clone(), queue.clone());

        *queue.failing.lock().unwrap() = true;
        let failed = service
            .enqueue(1, DatasetJobKind::IngestOutput, Some(5), serde_json::json!({}))
            .await;
        assert!(matches!(failed, Err(PipelineError::Internal(_))));

        let orphan = repo.find_by_id(1).await.unwrap().unwrap();
        assert_eq!(orphan.status, ResultStatus::Failed);
        assert!(orphan.scheduler_handle.is_none());
        assert!(!repo
            .has_active(1, DatasetJobKind::IngestOutput, Some(5))
            .await
            .unwrap());

        *queue.failing.lock().unwrap() = false;
        let unit = service
            .enqueue(1, DatasetJobKind::IngestOutput, Some(5), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(unit.id, 2);
        assert_eq!(queue.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolver_skips_unknown_paths() {
        let images = Arc::new(FakeImages {
            images: vec![
                Image {
                    id: 10,
                    dataset_id: 1,
                    path: "raw/a.tif".to_string(),
                    name: "a".to_string(),
                },
                Image {
                    id: 11,
                    dataset_id: 1,
                    path: "raw/b.tif".to_string(),
                    name: "b".to_string(),
                },
            ],
        });

        let by_path = ImageResolver::new(images.clone(), ImageIdentity::Path, 1);
        let resolved = by_path
            .resolve(&["raw/a.tif".to_string(), "raw/missing.tif".to_string()])
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["raw/a.tif"], 10);

        let projected = ImageResolver::new(
            images,
            ImageIdentity::ProjectedPath {
                directory: "thumbs".to_string(),
                extension: "png".to_string(),
            },
            1,
        );
        let resolved = projected
            .resolve(&["thumbs/b.png".to_string()])
            .await
            .unwrap();
        assert_eq!(resolved["thumbs/b.png"], 11);
    }
}
