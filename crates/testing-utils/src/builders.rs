//! 测试实体构建器

use analysis_domain::{AnalysisKind, DatasetJob, DatasetJobKind, Job, ResultStatus};
use chrono::{DateTime, Utc};

/// Job 构建器
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            job: Job::new(
                1,
                AnalysisKind::Clustering,
                serde_json::json!({ "app": "hdbscan" }),
                serde_json::json!({ "job_id": "remote-1" }),
                "remote-1".to_string(),
            ),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.job.id = id;
        self
    }

    pub fn with_dataset(mut self, dataset_id: i64) -> Self {
        self.job.dataset_id = dataset_id;
        self
    }

    pub fn with_kind(mut self, kind: AnalysisKind) -> Self {
        self.job.kind = kind;
        self.job.request = serde_json::json!({ "app": kind.app_name() });
        self
    }

    pub fn with_remote_id(mut self, remote_job_id: &str) -> Self {
        self.job.remote_job_id = Some(remote_job_id.to_string());
        self.job.response = serde_json::json!({ "job_id": remote_job_id });
        self
    }

    pub fn without_remote_id(mut self) -> Self {
        self.job.remote_job_id = None;
        self
    }

    pub fn with_remote_state(mut self, state: &str) -> Self {
        self.job.remote_state = Some(state.to_string());
        self
    }

    pub fn with_result_status(mut self, status: ResultStatus) -> Self {
        self.job.result_status = status;
        self
    }

    pub fn with_ingest_handle(mut self, handle: &str) -> Self {
        self.job.ingest_handle = Some(handle.to_string());
        self
    }

    pub fn with_display_mode(mut self, display_mode_id: i64) -> Self {
        self.job.display_mode_id = Some(display_mode_id);
        self
    }

    pub fn with_request(mut self, request: serde_json::Value) -> Self {
        self.job.request = request;
        self
    }

    pub fn with_finished_at(mut self, finished_at: DateTime<Utc>) -> Self {
        self.job.finished_at = Some(finished_at);
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// DatasetJob 构建器
pub struct DatasetJobBuilder {
    unit: DatasetJob,
}

impl DatasetJobBuilder {
    pub fn new(kind: DatasetJobKind) -> Self {
        Self {
            unit: DatasetJob::new(1, kind, None, serde_json::json!({})),
        }
    }

    /// 提交分析单元
    pub fn submit(kind: AnalysisKind) -> Self {
        Self::new(DatasetJobKind::SubmitAnalysis)
            .with_parameters(serde_json::json!({ "kind": kind.as_str() }))
    }

    /// 结果处理单元
    pub fn ingest(job_id: i64) -> Self {
        Self::new(DatasetJobKind::IngestOutput).with_job(job_id)
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.unit.id = id;
        self
    }

    pub fn with_dataset(mut self, dataset_id: i64) -> Self {
        self.unit.dataset_id = dataset_id;
        self
    }

    pub fn with_job(mut self, job_id: i64) -> Self {
        self.unit.job_id = Some(job_id);
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.unit.parameters = parameters;
        self
    }

    pub fn with_status(mut self, status: ResultStatus) -> Self {
        self.unit.status = status;
        self
    }

    pub fn build(self) -> DatasetJob {
        self.unit
    }
}
