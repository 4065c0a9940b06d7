use std::sync::Arc;

use analysis_core::AppConfig;
use analysis_dispatcher::{JobWatcher, RecoveryService, SystemRecoveryService};
use analysis_domain::{
    AnalysisService, DatasetJob, DatasetJobKind, DatasetJobRepository, Job, JobEnqueueService,
};
use analysis_infrastructure::{AnalysisApiClient, DatabaseManager, InMemoryTaskQueue};
use analysis_worker::{
    HandlerRegistry, IngestOutputHandler, IngesterRegistry, JobExecutor, OutputProcessor,
    SubmitAnalysisHandler, WorkerService,
};
use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 主应用程序
///
/// 持有数据库、远程客户端、进程内队列和执行器。队列只在进程内消费，
/// 监视器入队的单元必须由同一进程的工作池执行。
pub struct Application {
    config: AppConfig,
    db: DatabaseManager,
    analysis: Arc<dyn AnalysisService>,
    queue: Arc<InMemoryTaskQueue>,
    enqueue: Arc<JobEnqueueService>,
    executor: Arc<JobExecutor>,
    submit: Arc<SubmitAnalysisHandler>,
    ingest: Arc<IngestOutputHandler>,
}

impl Application {
    /// 创建新的应用实例：连接数据库、执行迁移、创建远程客户端
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        let db = DatabaseManager::new(&config.database).await?;
        db.migrate().await.context("执行数据库迁移失败")?;

        let analysis: Arc<dyn AnalysisService> =
            Arc::new(AnalysisApiClient::new(&config.analysis_api).context("创建分析服务客户端失败")?);

        Ok(Self::with_components(config, db, analysis))
    }

    /// 使用已有的数据库与分析服务组装应用
    pub fn with_components(
        config: AppConfig,
        db: DatabaseManager,
        analysis: Arc<dyn AnalysisService>,
    ) -> Self {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let enqueue = Arc::new(JobEnqueueService::new(
            db.dataset_job_repository(),
            queue.clone(),
        ));

        let processor = Arc::new(OutputProcessor::new(
            analysis.clone(),
            db.dataset_repository(),
            db.image_repository(),
            db.label_repository(),
            db.result_repository(),
            IngesterRegistry::with_defaults(),
            config.storage.clone(),
            config.worker.clone(),
        ));
        let ingest = Arc::new(IngestOutputHandler::new(db.job_repository(), processor));
        let submit = Arc::new(SubmitAnalysisHandler::new(
            db.dataset_repository(),
            db.image_repository(),
            db.job_repository(),
            analysis.clone(),
        ));

        let registry = HandlerRegistry::new()
            .register(submit.clone())
            .register(ingest.clone());
        let executor = Arc::new(JobExecutor::new(db.dataset_job_repository(), registry));

        Self {
            config,
            db,
            analysis,
            queue,
            enqueue,
            executor,
            submit,
            ingest,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }

    pub fn analysis(&self) -> Arc<dyn AnalysisService> {
        self.analysis.clone()
    }

    pub fn enqueue_service(&self) -> Arc<JobEnqueueService> {
        self.enqueue.clone()
    }

    pub fn executor(&self) -> Arc<JobExecutor> {
        self.executor.clone()
    }

    pub fn ingest_handler(&self) -> Arc<IngestOutputHandler> {
        self.ingest.clone()
    }

    /// 创建提交单元并在当前进程内执行，返回该单元创建的作业
    pub async fn submit_analysis(&self, dataset_id: i64, parameters: serde_json::Value) -> Result<Job> {
        let unit = self
            .db
            .dataset_job_repository()
            .create(&DatasetJob::new(
                dataset_id,
                DatasetJobKind::SubmitAnalysis,
                None,
                parameters,
            ))
            .await?;

        let submit = self.submit.clone();
        self.executor
            .execute_with(unit.id, |unit| async move { submit.submit(&unit).await })
            .await
            .with_context(|| format!("执行提交单元 {} 失败", unit.id))?
            .with_context(|| format!("提交单元 {} 已被其他执行者接手", unit.id))
    }

    /// 恢复上次进程遗留的状态
    pub async fn recover(&self) -> Result<()> {
        let recovery = SystemRecoveryService::new(
            self.db.job_repository(),
            self.db.dataset_job_repository(),
        );
        let report = recovery
            .recover_system_state()
            .await
            .context("系统状态恢复失败")?;
        for e in &report.errors {
            warn!("恢复过程中出现错误: {}", e);
        }
        Ok(())
    }

    /// 运行应用程序，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let run_worker = self.config.worker.enabled;
        let run_watcher = self.config.watcher.enabled;
        if run_watcher && !run_worker {
            return Err(anyhow::anyhow!(
                "启用监视器时必须同时启用工作池，否则入队的结果处理单元无人执行"
            ));
        }

        info!("启动应用程序");
        self.recover().await?;

        if !run_worker && !run_watcher {
            warn!("监视器和工作池都未启用，应用直接退出");
            return Ok(());
        }
        if !run_watcher {
            warn!("监视器未启用，工作池不会收到新的结果处理单元");
        }

        let worker_handle = if run_worker {
            let receiver = self
                .queue
                .take_receiver()
                .await
                .context("任务队列的消费端已被取走")?;
            let service = WorkerService::new(self.executor.clone(), &self.config.worker);
            let rx = shutdown_rx.resubscribe();
            Some(tokio::spawn(async move { service.run(receiver, rx).await }))
        } else {
            None
        };

        let watcher_handle = if run_watcher {
            let watcher = JobWatcher::new(
                self.db.job_repository(),
                self.analysis.clone(),
                self.enqueue.clone(),
                &self.config.watcher,
            );
            let rx = shutdown_rx.resubscribe();
            Some(tokio::spawn(async move { watcher.run(rx).await }))
        } else {
            None
        };

        if let Some(handle) = watcher_handle {
            if let Err(e) = handle.await {
                error!("作业监视器任务异常退出: {e}");
            }
        }

        if let Some(handle) = worker_handle {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("工作池运行失败: {e}"),
                Err(e) => error!("工作池任务异常退出: {e}"),
            }
        }

        info!("应用程序已停止");
        Ok(())
    }
}
