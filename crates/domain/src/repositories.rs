//! 领域仓储抽象
//!
//! 状态写入均为带前置状态校验的定向更新，避免并发单元互相覆盖字段

use crate::entities::{
    AnalysisKind, Cluster, ClusterItem, ClusterSummary, Dataset, DatasetJob, DatasetJobKind,
    DisplayMode, Image, IndividualSimilarRecord, Job, Label, OutlierRecord, Prediction,
    ResultStatus, SimilarRecord,
};
use analysis_core::PipelineResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 分析作业仓储抽象
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &Job) -> PipelineResult<Job>;
    async fn find_by_id(&self, id: i64) -> PipelineResult<Option<Job>>;
    async fn find_by_dataset(&self, dataset_id: i64) -> PipelineResult<Vec<Job>>;
    /// 结果状态为 None 且持有远程ID的作业
    async fn find_unprocessed(&self) -> PipelineResult<Vec<Job>>;
    async fn find_by_result_status(&self, status: ResultStatus) -> PipelineResult<Vec<Job>>;
    async fn update_remote_state(
        &self,
        id: i64,
        remote_state: &str,
        remote_status: Option<&str>,
    ) -> PipelineResult<()>;
    /// 记录已入队的结果处理单元以及远程终态时间
    async fn record_ingest_enqueued(
        &self,
        id: i64,
        ingest_handle: &str,
        finished_at: DateTime<Utc>,
    ) -> PipelineResult<()>;
    /// 仅当当前状态为 `from` 时写入，否则返回状态转换错误
    async fn update_result_status(
        &self,
        id: i64,
        from: ResultStatus,
        to: ResultStatus,
        error_message: Option<&str>,
    ) -> PipelineResult<()>;
    /// 显式重新处理：终态作业重置为 None 并清除处理句柄
    async fn reset_for_reprocess(&self, id: i64) -> PipelineResult<()>;
    async fn clear_ingest_handle(&self, id: i64) -> PipelineResult<()>;
}

/// 数据集作业仓储抽象
#[async_trait]
pub trait DatasetJobRepository: Send + Sync {
    async fn create(&self, dataset_job: &DatasetJob) -> PipelineResult<DatasetJob>;
    async fn find_by_id(&self, id: i64) -> PipelineResult<Option<DatasetJob>>;
    async fn find_active(&self) -> PipelineResult<Vec<DatasetJob>>;
    /// 是否存在同数据集、同类型、同作业的未终结单元
    async fn has_active(
        &self,
        dataset_id: i64,
        kind: DatasetJobKind,
        job_id: Option<i64>,
    ) -> PipelineResult<bool>;
    async fn set_scheduler_handle(&self, id: i64, handle: &str) -> PipelineResult<()>;
    /// 仅当当前状态为 `from` 时写入，同时维护开始与结束时间
    async fn update_status(
        &self,
        id: i64,
        from: ResultStatus,
        to: ResultStatus,
        error_message: Option<&str>,
    ) -> PipelineResult<()>;
}

/// 数据集与显示模式的只读访问
#[async_trait]
pub trait DatasetRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> PipelineResult<Option<Dataset>>;
    async fn find_display_mode(&self, id: i64) -> PipelineResult<Option<DisplayMode>>;
}

/// 图像仓储抽象
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// 按存储路径排序的全部图像，提交输入与近邻下标均以此为序
    async fn list_ordered(&self, dataset_id: i64) -> PipelineResult<Vec<Image>>;
    async fn find_by_paths(&self, dataset_id: i64, paths: &[String]) -> PipelineResult<Vec<Image>>;
    async fn find_by_names(&self, dataset_id: i64, names: &[String]) -> PipelineResult<Vec<Image>>;
}

/// 标签仓储抽象
#[async_trait]
pub trait LabelRepository: Send + Sync {
    /// 按 (数据集, 名称) 查找，不存在时以给定颜色创建
    async fn find_or_create(&self, dataset_id: i64, name: &str, color: &str)
        -> PipelineResult<Label>;
}

/// 分析结果仓储抽象
///
/// 每个作业的结果集整体替换：先清空，再分批写入
#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn clear_results(&self, job_id: i64, kind: AnalysisKind) -> PipelineResult<u64>;
    async fn insert_outliers(&self, records: &[OutlierRecord]) -> PipelineResult<()>;
    async fn insert_similars(&self, records: &[SimilarRecord]) -> PipelineResult<()>;
    async fn insert_individual_similar(&self, record: &IndividualSimilarRecord)
        -> PipelineResult<()>;
    async fn create_cluster(&self, job_id: i64, cluster_index: i64, name: &str)
        -> PipelineResult<Cluster>;
    async fn insert_cluster_items(&self, items: &[ClusterItem]) -> PipelineResult<()>;
    async fn insert_predictions(&self, records: &[Prediction]) -> PipelineResult<()>;

    async fn find_clusters(&self, job_id: i64) -> PipelineResult<Vec<ClusterSummary>>;
    async fn find_outliers(&self, job_id: i64) -> PipelineResult<Vec<OutlierRecord>>;
    async fn find_similars(&self, job_id: i64) -> PipelineResult<Vec<SimilarRecord>>;
    async fn find_individual_similar(&self, job_id: i64)
        -> PipelineResult<Option<IndividualSimilarRecord>>;
    async fn find_predictions(&self, job_id: i64) -> PipelineResult<Vec<Prediction>>;
}
