//! 作业输出处理
//!
//! 下载归档、解压、定位结果文件，然后按分析类型把结果写入数据库。
//! 每次处理前先清空该作业已有的结果，重复处理得到相同的结果集。

pub mod classification;
pub mod clustering;
pub mod outliers;
pub mod projection;
pub mod similarity;
pub mod single_similarity;
pub mod strategy;

pub use strategy::{drive, BatchSink, IngesterRegistry, OutputIngester, ResolvedBatch};

use analysis_core::{PipelineError, PipelineResult, StorageConfig, WorkerConfig};
use analysis_domain::{
    AnalysisService, DatasetRepository, ImageIdentity, ImageRepository, ImageResolver, Job,
    LabelRepository, ResultRepository,
};
use analysis_infrastructure::extract_and_locate;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

const ARCHIVE_FILE_NAME: &str = "output.tar.gz";
const EXTRACTED_DIR_NAME: &str = "extracted";

/// 一次结果处理的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// 读取到的条目数
    pub items: usize,
    /// 写入的记录数
    pub stored: usize,
    /// 无法对应到数据集图像的条目数
    pub unresolved: usize,
    /// 结果文件中被跳过的非对象元素
    pub skipped: usize,
}

/// 写入器共享的处理上下文
pub struct IngestContext {
    pub job: Job,
    pub resolver: ImageResolver,
    pub images: Arc<dyn ImageRepository>,
    pub labels: Arc<dyn LabelRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub batch_size: usize,
    pub stream_buffer_size: usize,
    pub progress_interval: usize,
    /// 可视化产物目录
    pub artifacts_dir: PathBuf,
}

impl IngestContext {
    pub fn identity(&self) -> &ImageIdentity {
        self.resolver.identity()
    }
}

/// 作业输出处理器
pub struct OutputProcessor {
    analysis: Arc<dyn AnalysisService>,
    datasets: Arc<dyn DatasetRepository>,
    images: Arc<dyn ImageRepository>,
    labels: Arc<dyn LabelRepository>,
    results: Arc<dyn ResultRepository>,
    ingesters: IngesterRegistry,
    storage: StorageConfig,
    worker: WorkerConfig,
}

impl OutputProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        analysis: Arc<dyn AnalysisService>,
        datasets: Arc<dyn DatasetRepository>,
        images: Arc<dyn ImageRepository>,
        labels: Arc<dyn LabelRepository>,
        results: Arc<dyn ResultRepository>,
        ingesters: IngesterRegistry,
        storage: StorageConfig,
        worker: WorkerConfig,
    ) -> Self {
        Self {
            analysis,
            datasets,
            images,
            labels,
            results,
            ingesters,
            storage,
            worker,
        }
    }

    #[instrument(skip(self, job), fields(job_id = job.id, kind = %job.kind))]
    pub async fn process(&self, job: &Job) -> PipelineResult<IngestReport> {
        let started = Instant::now();
        let ingester = self.ingesters.get(job.kind)?;
        let remote_job_id = job.remote_job_id.as_deref().ok_or_else(|| {
            PipelineError::JobExecution(format!("{} 没有远程作业ID", job.entity_description()))
        })?;

        let work_dir = self.storage.job_work_dir(job.id);
        tokio::fs::create_dir_all(&work_dir).await?;

        let archive = work_dir.join(ARCHIVE_FILE_NAME);
        let bytes = self
            .analysis
            .download_job_output(remote_job_id, &archive)
            .await?;
        info!("已下载输出归档 {} ({} 字节)", archive.display(), bytes);

        let extracted = work_dir.join(EXTRACTED_DIR_NAME);
        if tokio::fs::try_exists(&extracted).await? {
            tokio::fs::remove_dir_all(&extracted).await?;
        }
        let result_file = extract_and_locate(
            archive,
            extracted,
            ingester.expected_file().to_string(),
        )
        .await?;

        let identity = self.identity_for(job).await?;
        let cleared = self.results.clear_results(job.id, job.kind).await?;
        if cleared > 0 {
            info!("已清除 {} 条旧结果", cleared);
        }

        let ctx = IngestContext {
            job: job.clone(),
            resolver: ImageResolver::new(self.images.clone(), identity, job.dataset_id),
            images: self.images.clone(),
            labels: self.labels.clone(),
            results: self.results.clone(),
            batch_size: self.worker.ingest_batch_size.max(1),
            stream_buffer_size: self.worker.stream_buffer_size,
            progress_interval: self.worker.progress_log_interval,
            artifacts_dir: self.storage.job_artifacts_dir(job.dataset_id, job.id),
        };

        let report = ingester.ingest(&ctx, &result_file).await?;

        let elapsed_ms = started.elapsed().as_millis() as f64;
        metrics::histogram!("analysis_ingest_duration_ms", "kind" => job.kind.as_str())
            .record(elapsed_ms);
        info!(
            "结果处理完成，耗时 {:.0}ms: {:?}",
            elapsed_ms, report
        );
        Ok(report)
    }

    async fn identity_for(&self, job: &Job) -> PipelineResult<ImageIdentity> {
        let mode = match job.display_mode_id {
            Some(id) => Some(
                self.datasets
                    .find_display_mode(id)
                    .await?
                    .ok_or(PipelineError::DisplayModeNotFound { id })?,
            ),
            None => None,
        };
        Ok(ImageIdentity::for_display_mode(mode.as_ref()))
    }
}
