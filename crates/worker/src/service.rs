use analysis_core::{PipelineError, PipelineResult, WorkerConfig};
use analysis_infrastructure::{QueuedTask, TaskReceiver};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::executor::{ExecutionOutcome, JobExecutor};

/// Worker服务：从队列接收单元，在并发上限内执行
///
/// 收到停止信号后不再接收新单元，已开始的单元运行到结束。
pub struct WorkerService {
    executor: Arc<JobExecutor>,
    max_concurrent_jobs: usize,
}

impl WorkerService {
    pub fn new(executor: Arc<JobExecutor>, config: &WorkerConfig) -> Self {
        Self {
            executor,
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
        }
    }

    pub async fn run(
        &self,
        mut receiver: TaskReceiver,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> PipelineResult<()> {
        info!("启动Worker服务，最大并发 {}", self.max_concurrent_jobs);
        let permits = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let mut running = JoinSet::new();

        loop {
            while running.try_join_next().is_some() {}

            let task = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Worker服务收到停止信号");
                    break;
                }
                task = receiver.recv() => match task {
                    Some(task) => task,
                    None => {
                        info!("任务队列已关闭");
                        break;
                    }
                },
            };

            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    warn!("停止时丢弃未开始的单元: {}", task.handle);
                    break;
                }
                permit = permits.clone().acquire_owned() => permit
                    .map_err(|e| PipelineError::Internal(format!("并发信号量已关闭: {e}")))?,
            };

            let executor = self.executor.clone();
            running.spawn(async move {
                let _permit = permit;
                run_task(&executor, task).await;
            });
        }

        if !running.is_empty() {
            info!("等待 {} 个运行中的单元结束", running.len());
        }
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!("单元执行任务异常退出: {}", e);
            }
        }

        info!("Worker服务已停止");
        Ok(())
    }
}

async fn run_task(executor: &JobExecutor, task: QueuedTask) {
    let QueuedTask { handle, unit } = task;
    debug!("接收单元 {} (句柄 {})", unit.dataset_job_id, handle);

    match executor.execute(unit.dataset_job_id).await {
        Ok(ExecutionOutcome::Completed) => {}
        Ok(ExecutionOutcome::Skipped) => {
            debug!("单元 {} 已跳过", unit.dataset_job_id);
        }
        Err(e) => {
            // 失败状态已由执行器记录
            error!("单元 {} 执行失败: {}", unit.dataset_job_id, e);
        }
    }
}
