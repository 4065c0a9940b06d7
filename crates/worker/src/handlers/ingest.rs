use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{is_success_state, DatasetJob, DatasetJobKind, JobRepository, ResultStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::UnitHandler;
use crate::output::OutputProcessor;

/// 处理远程运行已结束的作业结果
pub struct IngestOutputHandler {
    jobs: Arc<dyn JobRepository>,
    processor: Arc<OutputProcessor>,
}

impl IngestOutputHandler {
    pub fn new(jobs: Arc<dyn JobRepository>, processor: Arc<OutputProcessor>) -> Self {
        Self { jobs, processor }
    }

    pub async fn ingest(&self, job_id: i64) -> PipelineResult<()> {
        let job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound { id: job_id })?;

        if job.result_status != ResultStatus::None {
            warn!(
                "{} 的结果状态为 {}，跳过",
                job.entity_description(),
                job.result_status
            );
            return Ok(());
        }

        self.jobs
            .update_result_status(job.id, ResultStatus::None, ResultStatus::Running, None)
            .await?;

        let remote_state = job.remote_state.as_deref().unwrap_or_default();
        if !is_success_state(remote_state) {
            let message = format!(
                "远程运行失败: 状态 {}, {}",
                if remote_state.is_empty() { "UNKNOWN" } else { remote_state },
                job.remote_status.as_deref().unwrap_or("无详细信息")
            );
            warn!("{}: {}", job.entity_description(), message);
            self.jobs
                .update_result_status(
                    job.id,
                    ResultStatus::Running,
                    ResultStatus::Failed,
                    Some(&message),
                )
                .await?;
            return Ok(());
        }

        match self.processor.process(&job).await {
            Ok(report) => {
                self.jobs
                    .update_result_status(
                        job.id,
                        ResultStatus::Running,
                        ResultStatus::Completed,
                        None,
                    )
                    .await?;
                info!(
                    "{} 结果处理完成: 条目 {}, 写入 {}, 未解析 {}",
                    job.entity_description(),
                    report.items,
                    report.stored,
                    report.unresolved
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(persist_err) = self
                    .jobs
                    .update_result_status(
                        job.id,
                        ResultStatus::Running,
                        ResultStatus::Failed,
                        Some(&message),
                    )
                    .await
                {
                    error!("记录作业失败状态时出错: {}", persist_err);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl UnitHandler for IngestOutputHandler {
    fn kind(&self) -> DatasetJobKind {
        DatasetJobKind::IngestOutput
    }

    async fn handle(&self, unit: &DatasetJob) -> PipelineResult<()> {
        let job_id = unit.job_id.ok_or_else(|| {
            PipelineError::InvalidJobParams(format!("{} 缺少 job_id", unit.entity_description()))
        })?;
        self.ingest(job_id).await
    }
}
