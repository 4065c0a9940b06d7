//! 仓储与外部服务的内存实现
//!
//! 用于不需要数据库或远程服务的单元测试。

use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{
    AnalysisService, DatasetJob, DatasetJobKind, DatasetJobRepository, Job, JobRepository,
    JobStatusResponse, QueuedUnit, ResultStatus, SubmitJobRequest, SubmitJobResponse, TaskQueue,
    UploadResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// JobRepository 的内存实现
#[derive(Debug, Clone, Default)]
pub struct MockJobRepository {
    jobs: Arc<Mutex<HashMap<i64, Job>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        let repo = Self::new();
        {
            let mut stored = repo.jobs.lock().unwrap();
            let mut next_id = repo.next_id.lock().unwrap();
            for job in jobs {
                *next_id = (*next_id).max(job.id);
                stored.insert(job.id, job);
            }
        }
        repo
    }

    pub fn get(&self, id: i64) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    fn update<F>(&self, id: i64, apply: F) -> PipelineResult<()>
    where
        F: FnOnce(&mut Job) -> PipelineResult<()>,
    {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(PipelineError::JobNotFound { id })?;
        apply(job)
    }
}

#[async_trait]
impl JobRepository for MockJobRepository {
    async fn create(&self, job: &Job) -> PipelineResult<Job> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let mut created = job.clone();
        created.id = *next_id;
        self.jobs.lock().unwrap().insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> PipelineResult<Option<Job>> {
        Ok(self.get(id))
    }

    async fn find_by_dataset(&self, dataset_id: i64) -> PipelineResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.dataset_id == dataset_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn find_unprocessed(&self) -> PipelineResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.result_status == ResultStatus::None && j.remote_job_id.is_some())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn find_by_result_status(&self, status: ResultStatus) -> PipelineResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.result_status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn update_remote_state(
        &self,
        id: i64,
        remote_state: &str,
        remote_status: Option<&str>,
    ) -> PipelineResult<()> {
        self.update(id, |job| {
            job.remote_state = Some(remote_state.to_string());
            job.remote_status = remote_status.map(str::to_string);
            Ok(())
        })
    }

    async fn record_ingest_enqueued(
        &self,
        id: i64,
        ingest_handle: &str,
        finished_at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        self.update(id, |job| {
            job.ingest_handle = Some(ingest_handle.to_string());
            job.finished_at = Some(finished_at);
            Ok(())
        })
    }

    async fn update_result_status(
        &self,
        id: i64,
        from: ResultStatus,
        to: ResultStatus,
        error_message: Option<&str>,
    ) -> PipelineResult<()> {
        from.transition(to)?;
        self.update(id, |job| {
            if job.result_status != from {
                return Err(PipelineError::InvalidStatusTransition {
                    from: job.result_status.to_string(),
                    to: to.to_string(),
                });
            }
            job.result_status = to;
            if let Some(message) = error_message {
                job.error_message = Some(message.to_string());
            }
            Ok(())
        })
    }

    async fn reset_for_reprocess(&self, id: i64) -> PipelineResult<()> {
        self.update(id, |job| {
            if !job.result_status.is_terminal() {
                return Err(PipelineError::InvalidStatusTransition {
                    from: job.result_status.to_string(),
                    to: ResultStatus::None.to_string(),
                });
            }
            job.result_status = ResultStatus::None;
            job.error_message = None;
            job.ingest_handle = None;
            Ok(())
        })
    }

    async fn clear_ingest_handle(&self, id: i64) -> PipelineResult<()> {
        self.update(id, |job| {
            job.ingest_handle = None;
            Ok(())
        })
    }
}

/// DatasetJobRepository 的内存实现
#[derive(Debug, Clone, Default)]
pub struct MockDatasetJobRepository {
    units: Arc<Mutex<HashMap<i64, DatasetJob>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockDatasetJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Option<DatasetJob> {
        self.units.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<DatasetJob> {
        let mut units: Vec<DatasetJob> = self.units.lock().unwrap().values().cloned().collect();
        units.sort_by_key(|u| u.id);
        units
    }
}

#[async_trait]
impl DatasetJobRepository for MockDatasetJobRepository {
    async fn create(&self, dataset_job: &DatasetJob) -> PipelineResult<DatasetJob> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let mut created = dataset_job.clone();
        created.id = *next_id;
        self.units
            .lock()
            .unwrap()
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> PipelineResult<Option<DatasetJob>> {
        Ok(self.get(id))
    }

    async fn find_active(&self) -> PipelineResult<Vec<DatasetJob>> {
        Ok(self.all().into_iter().filter(|u| u.is_active()).collect())
    }

    async fn has_active(
        &self,
        dataset_id: i64,
        kind: DatasetJobKind,
        job_id: Option<i64>,
    ) -> PipelineResult<bool> {
        Ok(self.units.lock().unwrap().values().any(|u| {
            u.dataset_id == dataset_id && u.kind == kind && u.job_id == job_id && u.is_active()
        }))
    }

    async fn set_scheduler_handle(&self, id: i64, handle: &str) -> PipelineResult<()> {
        let mut units = self.units.lock().unwrap();
        let unit = units
            .get_mut(&id)
            .ok_or(PipelineError::DatasetJobNotFound { id })?;
        unit.scheduler_handle = Some(handle.to_string());
        Ok(())
    }

    async fn update_status(
        &self,
        id: i64,
        from: ResultStatus,
        to: ResultStatus,
        error_message: Option<&str>,
    ) -> PipelineResult<()> {
        let mut units = self.units.lock().unwrap();
        let unit = units
            .get_mut(&id)
            .ok_or(PipelineError::DatasetJobNotFound { id })?;
        if unit.status != from {
            return Err(PipelineError::InvalidStatusTransition {
                from: unit.status.to_string(),
                to: to.to_string(),
            });
        }
        unit.update_status(to)?;
        if let Some(message) = error_message {
            unit.error_message = Some(message.to_string());
        }
        Ok(())
    }
}

/// 记录入队单元的任务队列
#[derive(Debug, Clone, Default)]
pub struct MockTaskQueue {
    units: Arc<Mutex<Vec<(String, QueuedUnit)>>>,
    fail_enqueue: Arc<Mutex<bool>>,
}

impl MockTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_enqueue(&self, fail: bool) {
        *self.fail_enqueue.lock().unwrap() = fail;
    }

    pub fn enqueued(&self) -> Vec<QueuedUnit> {
        self.units
            .lock()
            .unwrap()
            .iter()
            .map(|(_, unit)| unit.clone())
            .collect()
    }

    pub fn handles(&self) -> Vec<String> {
        self.units
            .lock()
            .unwrap()
            .iter()
            .map(|(handle, _)| handle.clone())
            .collect()
    }
}

#[async_trait]
impl TaskQueue for MockTaskQueue {
    async fn enqueue(&self, unit: QueuedUnit) -> PipelineResult<String> {
        if *self.fail_enqueue.lock().unwrap() {
            return Err(PipelineError::Internal("模拟入队失败".to_string()));
        }
        let mut units = self.units.lock().unwrap();
        let handle = format!("mock-handle-{}", units.len() + 1);
        units.push((handle.clone(), unit));
        Ok(handle)
    }

    async fn pending(&self) -> PipelineResult<usize> {
        Ok(self.units.lock().unwrap().len())
    }
}

/// 远程分析服务的脚本化替身
///
/// 状态查询按远程ID依次返回预设的状态，最后一个状态重复返回；
/// 下载返回预设的归档字节。
#[derive(Debug, Clone, Default)]
pub struct MockAnalysisService {
    statuses: Arc<Mutex<HashMap<String, VecDeque<JobStatusResponse>>>>,
    failing_status: Arc<Mutex<HashMap<String, StatusFailure>>>,
    archives: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    submitted: Arc<Mutex<Vec<SubmitJobRequest>>>,
    uploaded: Arc<Mutex<Vec<PathBuf>>>,
    status_calls: Arc<Mutex<Vec<String>>>,
    next_job_id: Arc<Mutex<u64>>,
    fail_submit: Arc<Mutex<Option<(u16, String)>>>,
}

/// 状态查询的预设失败
#[derive(Debug, Clone)]
pub enum StatusFailure {
    Network(String),
    Api(u16, String),
}

impl MockAnalysisService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为远程作业预设状态序列
    pub fn script_states(&self, remote_job_id: &str, states: &[&str]) {
        let responses = states
            .iter()
            .map(|state| JobStatusResponse {
                state: state.to_string(),
                status: Some(format!("remote {state}")),
                exit_status: None,
                elapsed_time: None,
            })
            .collect();
        self.statuses
            .lock()
            .unwrap()
            .insert(remote_job_id.to_string(), responses);
    }

    pub fn fail_status(&self, remote_job_id: &str, kind: StatusFailure) {
        self.failing_status
            .lock()
            .unwrap()
            .insert(remote_job_id.to_string(), kind);
    }

    pub fn fail_submit(&self, status: u16, body: &str) {
        *self.fail_submit.lock().unwrap() = Some((status, body.to_string()));
    }

    /// 预设下载返回的归档内容
    pub fn set_archive(&self, remote_job_id: &str, bytes: Vec<u8>) {
        self.archives
            .lock()
            .unwrap()
            .insert(remote_job_id.to_string(), bytes);
    }

    pub fn submitted(&self) -> Vec<SubmitJobRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn uploaded(&self) -> Vec<PathBuf> {
        self.uploaded.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisService for MockAnalysisService {
    async fn describe(&self, app: &str) -> PipelineResult<serde_json::Value> {
        Ok(serde_json::json!({ "app": app, "parameters": {} }))
    }

    async fn submit_job(&self, request: &SubmitJobRequest) -> PipelineResult<SubmitJobResponse> {
        if let Some((status, body)) = self.fail_submit.lock().unwrap().clone() {
            return Err(PipelineError::Api { status, body });
        }

        self.submitted.lock().unwrap().push(request.clone());
        let mut next = self.next_job_id.lock().unwrap();
        *next += 1;
        let job_id = format!("remote-{}", *next);
        let raw = serde_json::json!({ "job_id": job_id, "state": "PENDING" });
        Ok(SubmitJobResponse {
            job_id,
            state: Some("PENDING".to_string()),
            status: None,
            submit_date: None,
            raw,
        })
    }

    async fn get_job_status(&self, remote_job_id: &str) -> PipelineResult<JobStatusResponse> {
        self.status_calls
            .lock()
            .unwrap()
            .push(remote_job_id.to_string());

        if let Some(kind) = self.failing_status.lock().unwrap().get(remote_job_id) {
            return Err(match kind.clone() {
                StatusFailure::Network(message) => PipelineError::Network(message),
                StatusFailure::Api(status, body) => PipelineError::Api { status, body },
            });
        }

        let mut statuses = self.statuses.lock().unwrap();
        let queue = statuses.get_mut(remote_job_id).ok_or(PipelineError::Api {
            status: 404,
            body: format!("unknown job {remote_job_id}"),
        })?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.ok_or(PipelineError::Api {
            status: 404,
            body: format!("no status for {remote_job_id}"),
        })
    }

    async fn download_job_output(&self, remote_job_id: &str, dest: &Path) -> PipelineResult<u64> {
        let bytes = self
            .archives
            .lock()
            .unwrap()
            .get(remote_job_id)
            .cloned()
            .ok_or(PipelineError::Api {
                status: 404,
                body: format!("no output for {remote_job_id}"),
            })?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn upload_file(&self, path: &Path) -> PipelineResult<UploadResponse> {
        self.uploaded.lock().unwrap().push(path.to_path_buf());
        Ok(UploadResponse {
            uuid: format!("upload-{}", self.uploaded.lock().unwrap().len()),
        })
    }
}
