use crate::entities::DatasetJobKind;
use analysis_core::PipelineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 队列中传递的工作单元引用，单元状态以数据库为准
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedUnit {
    pub dataset_job_id: i64,
    pub kind: DatasetJobKind,
}

/// 后台任务队列接口
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 入队并返回调度句柄
    async fn enqueue(&self, unit: QueuedUnit) -> PipelineResult<String>;
    async fn pending(&self) -> PipelineResult<usize>;
}
