use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{DatasetJob, DatasetJobRepository, ResultStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::handlers::HandlerRegistry;

/// 单次执行的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    /// 单元已终结或已被其他执行者接手
    Skipped,
}

/// 数据集作业执行器
///
/// 负责单元状态机：执行前重新读取状态，None 置为 Running 后调用处理器，
/// 处理器失败时先持久化 Failed 及错误信息再返回错误。
pub struct JobExecutor {
    dataset_jobs: Arc<dyn DatasetJobRepository>,
    registry: HandlerRegistry,
}

impl JobExecutor {
    pub fn new(dataset_jobs: Arc<dyn DatasetJobRepository>, registry: HandlerRegistry) -> Self {
        let kinds: Vec<String> = registry.kinds().iter().map(|k| k.to_string()).collect();
        info!("执行器已注册的作业类型: {}", kinds.join(", "));
        Self {
            dataset_jobs,
            registry,
        }
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, dataset_job_id: i64) -> PipelineResult<ExecutionOutcome> {
        let registry = &self.registry;
        let outcome = self
            .execute_with(dataset_job_id, |unit| async move {
                match registry.get(unit.kind) {
                    Some(handler) => handler.handle(&unit).await,
                    None => Err(PipelineError::JobExecution(format!(
                        "没有注册 {} 类型的处理器",
                        unit.kind
                    ))),
                }
            })
            .await?;

        Ok(match outcome {
            Some(()) => ExecutionOutcome::Completed,
            None => ExecutionOutcome::Skipped,
        })
    }

    /// 以给定的工作代替注册的处理器执行单元，状态流转与 `execute` 相同。
    /// 单元已终结或已被接手时返回 `None`。
    pub async fn execute_with<T, F, Fut>(
        &self,
        dataset_job_id: i64,
        work: F,
    ) -> PipelineResult<Option<T>>
    where
        F: FnOnce(DatasetJob) -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let unit = self
            .dataset_jobs
            .find_by_id(dataset_job_id)
            .await?
            .ok_or(PipelineError::DatasetJobNotFound { id: dataset_job_id })?;

        if unit.status != ResultStatus::None {
            warn!(
                "跳过状态为 {} 的 {}",
                unit.status,
                unit.entity_description()
            );
            return Ok(None);
        }

        match self
            .dataset_jobs
            .update_status(unit.id, ResultStatus::None, ResultStatus::Running, None)
            .await
        {
            Ok(()) => {}
            Err(PipelineError::InvalidStatusTransition { from, .. }) => {
                warn!("{} 已被接手 (当前状态 {})", unit.entity_description(), from);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        info!("开始执行: {}", unit.entity_description());
        let started = Instant::now();

        let result = work(unit.clone()).await;

        let elapsed = started.elapsed().as_secs_f64();
        metrics::histogram!("analysis_unit_duration_seconds", "kind" => unit.kind.as_str())
            .record(elapsed);

        match result {
            Ok(value) => {
                self.dataset_jobs
                    .update_status(unit.id, ResultStatus::Running, ResultStatus::Completed, None)
                    .await?;
                metrics::counter!("analysis_units_completed_total", "kind" => unit.kind.as_str())
                    .increment(1);
                info!("执行完成: {} (耗时 {:.2}s)", unit.entity_description(), elapsed);
                Ok(Some(value))
            }
            Err(e) => {
                let message = e.to_string();
                error!("执行失败: {}: {}", unit.entity_description(), message);
                if let Err(persist_err) = self
                    .dataset_jobs
                    .update_status(
                        unit.id,
                        ResultStatus::Running,
                        ResultStatus::Failed,
                        Some(&message),
                    )
                    .await
                {
                    error!("记录失败状态时出错: {}", persist_err);
                }
                metrics::counter!("analysis_units_failed_total", "kind" => unit.kind.as_str())
                    .increment(1);
                Err(e)
            }
        }
    }
}
