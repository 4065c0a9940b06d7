use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use analysis_core::PipelineResult;
use analysis_domain::{DatasetJobRepository, JobRepository, ResultStatus};

const INTERRUPTED_MESSAGE: &str = "进程重启时中断";

/// 恢复服务接口
#[async_trait]
pub trait RecoveryService: Send + Sync {
    /// 系统启动时恢复作业状态
    async fn recover_system_state(&self) -> PipelineResult<RecoveryReport>;
}

/// 恢复报告
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// 标记为失败的数据集作业
    pub failed_units: Vec<i64>,
    /// 标记为失败的分析作业
    pub failed_jobs: Vec<i64>,
    /// 清除了处理句柄、等待重新入队的分析作业
    pub requeued_jobs: Vec<i64>,
    pub recovery_duration_ms: u64,
    pub errors: Vec<String>,
}

/// 恢复服务实现
///
/// 任务队列在内存中，进程退出后未完成的单元不会再被执行：
/// 遗留的 None/Running 单元标记为失败，处理中的作业标记为失败，
/// 已入队但未开始处理的作业清除句柄，由监视器重新入队。
pub struct SystemRecoveryService {
    jobs: Arc<dyn JobRepository>,
    dataset_jobs: Arc<dyn DatasetJobRepository>,
}

impl SystemRecoveryService {
    pub fn new(jobs: Arc<dyn JobRepository>, dataset_jobs: Arc<dyn DatasetJobRepository>) -> Self {
        Self { jobs, dataset_jobs }
    }

    async fn fail_interrupted_units(&self, report: &mut RecoveryReport) -> PipelineResult<()> {
        for unit in self.dataset_jobs.find_active().await? {
            let result = async {
                if unit.status == ResultStatus::None {
                    self.dataset_jobs
                        .update_status(unit.id, ResultStatus::None, ResultStatus::Running, None)
                        .await?;
                }
                self.dataset_jobs
                    .update_status(
                        unit.id,
                        ResultStatus::Running,
                        ResultStatus::Failed,
                        Some(INTERRUPTED_MESSAGE),
                    )
                    .await
            }
            .await;

            match result {
                Ok(()) => {
                    warn!("{} 已标记为失败", unit.entity_description());
                    report.failed_units.push(unit.id);
                }
                Err(e) => report
                    .errors
                    .push(format!("恢复 {} 失败: {}", unit.entity_description(), e)),
            }
        }
        Ok(())
    }

    async fn fail_running_jobs(&self, report: &mut RecoveryReport) -> PipelineResult<()> {
        for job in self.jobs.find_by_result_status(ResultStatus::Running).await? {
            match self
                .jobs
                .update_result_status(
                    job.id,
                    ResultStatus::Running,
                    ResultStatus::Failed,
                    Some(INTERRUPTED_MESSAGE),
                )
                .await
            {
                Ok(()) => {
                    warn!("{} 已标记为失败", job.entity_description());
                    report.failed_jobs.push(job.id);
                }
                Err(e) => report
                    .errors
                    .push(format!("恢复 {} 失败: {}", job.entity_description(), e)),
            }
        }
        Ok(())
    }

    async fn release_pending_ingests(&self, report: &mut RecoveryReport) -> PipelineResult<()> {
        for job in self.jobs.find_unprocessed().await? {
            if job.ingest_handle.is_none() {
                continue;
            }
            match self.jobs.clear_ingest_handle(job.id).await {
                Ok(()) => {
                    info!("{} 将被重新入队", job.entity_description());
                    report.requeued_jobs.push(job.id);
                }
                Err(e) => report
                    .errors
                    .push(format!("清除 {} 的句柄失败: {}", job.entity_description(), e)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecoveryService for SystemRecoveryService {
    async fn recover_system_state(&self) -> PipelineResult<RecoveryReport> {
        info!("开始系统状态恢复");
        let started = Instant::now();
        let mut report = RecoveryReport::default();

        self.fail_interrupted_units(&mut report).await?;
        self.fail_running_jobs(&mut report).await?;
        self.release_pending_ingests(&mut report).await?;

        report.recovery_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "系统状态恢复完成: 失败单元 {}, 失败作业 {}, 重新入队 {}, 错误 {}, 耗时 {}ms",
            report.failed_units.len(),
            report.failed_jobs.len(),
            report.requeued_jobs.len(),
            report.errors.len(),
            report.recovery_duration_ms
        );
        Ok(report)
    }
}
