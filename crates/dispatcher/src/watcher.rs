use std::sync::Arc;
use std::time::Duration;

use analysis_core::{PipelineError, PipelineResult, WatcherConfig};
use analysis_domain::{AnalysisService, DatasetJobKind, Job, JobEnqueueService, JobRepository};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// 一轮轮询的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchReport {
    pub checked: usize,
    pub still_running: usize,
    pub enqueued: usize,
    pub errors: usize,
}

/// 单个作业的检查结果
enum JobCheck {
    Running,
    Enqueued,
    AlreadyEnqueued,
}

/// 作业监视器
///
/// 按固定间隔查询所有待处理作业的远程状态，远程运行结束后为其入队结果处理单元。
/// 单个作业的查询失败只记录日志，不影响同一轮中的其他作业。
pub struct JobWatcher {
    jobs: Arc<dyn JobRepository>,
    analysis: Arc<dyn AnalysisService>,
    enqueue: Arc<JobEnqueueService>,
    poll_interval: Duration,
}

impl JobWatcher {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        analysis: Arc<dyn AnalysisService>,
        enqueue: Arc<JobEnqueueService>,
        config: &WatcherConfig,
    ) -> Self {
        Self {
            jobs,
            analysis,
            enqueue,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
        }
    }

    /// 执行一轮轮询
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> PipelineResult<WatchReport> {
        metrics::counter!("analysis_watcher_polls_total").increment(1);
        let jobs = self.jobs.find_unprocessed().await?;
        let mut report = WatchReport::default();

        for job in jobs {
            report.checked += 1;
            match self.check_job(&job).await {
                Ok(JobCheck::Running) => report.still_running += 1,
                Ok(JobCheck::Enqueued) => report.enqueued += 1,
                Ok(JobCheck::AlreadyEnqueued) => {}
                Err(e) => {
                    report.errors += 1;
                    warn!("检查 {} 失败: {}", job.entity_description(), e);
                }
            }
        }

        if report.checked > 0 {
            debug!("轮询完成: {:?}", report);
        }
        Ok(report)
    }

    async fn check_job(&self, job: &Job) -> PipelineResult<JobCheck> {
        let remote_job_id = job.remote_job_id.as_deref().ok_or_else(|| {
            PipelineError::Internal(format!("{} 没有远程作业ID", job.entity_description()))
        })?;
        let status = self.analysis.get_job_status(remote_job_id).await?;

        let state_changed = job.remote_state.as_deref() != Some(status.state.as_str())
            || job.remote_status != status.status;
        if state_changed {
            self.jobs
                .update_remote_state(job.id, &status.state, status.status.as_deref())
                .await?;
        }

        if !status.is_terminal() {
            return Ok(JobCheck::Running);
        }

        if job.ingest_handle.is_some() {
            return Ok(JobCheck::AlreadyEnqueued);
        }

        let unit = match self
            .enqueue
            .enqueue(
                job.dataset_id,
                DatasetJobKind::IngestOutput,
                Some(job.id),
                serde_json::json!({ "job_id": job.id }),
            )
            .await
        {
            Ok(unit) => unit,
            Err(PipelineError::AlreadyActive { .. }) => {
                debug!("{} 已有进行中的结果处理单元", job.entity_description());
                return Ok(JobCheck::AlreadyEnqueued);
            }
            Err(e) => return Err(e),
        };

        let handle = unit.scheduler_handle.clone().ok_or_else(|| {
            PipelineError::Internal(format!("{} 入队后没有句柄", unit.entity_description()))
        })?;
        self.jobs
            .record_ingest_enqueued(job.id, &handle, Utc::now())
            .await?;

        metrics::counter!("analysis_jobs_enqueued_total", "kind" => job.kind.as_str())
            .increment(1);
        info!(
            "{} 远程状态 {}，已入队结果处理 (句柄 {})",
            job.entity_description(),
            status.state,
            handle
        );
        Ok(JobCheck::Enqueued)
    }

    /// 持续轮询直到收到停止信号，停止信号只在两轮之间生效
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("启动作业监视器，轮询间隔 {:?}", self.poll_interval);

        loop {
            if let Err(e) = self.poll_once().await {
                error!("作业轮询失败: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown_rx.recv() => {
                    info!("作业监视器收到停止信号");
                    break;
                }
            }
        }
    }
}
