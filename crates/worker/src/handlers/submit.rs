use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{
    AnalysisService, DataInputs, DatasetJob, DatasetJobKind, DatasetRepository, ImageIdentity,
    ImageRepository, Job, JobRepository, SubmitJobRequest,
};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::UnitHandler;

const DEFAULT_FORMAT: &str = "png";

/// 向远程服务提交分析，成功后才创建作业记录
pub struct SubmitAnalysisHandler {
    datasets: Arc<dyn DatasetRepository>,
    images: Arc<dyn ImageRepository>,
    jobs: Arc<dyn JobRepository>,
    analysis: Arc<dyn AnalysisService>,
}

impl SubmitAnalysisHandler {
    pub fn new(
        datasets: Arc<dyn DatasetRepository>,
        images: Arc<dyn ImageRepository>,
        jobs: Arc<dyn JobRepository>,
        analysis: Arc<dyn AnalysisService>,
    ) -> Self {
        Self {
            datasets,
            images,
            jobs,
            analysis,
        }
    }

    /// 提交一个数据集作业描述的分析，返回创建的作业
    pub async fn submit(&self, unit: &DatasetJob) -> PipelineResult<Job> {
        let params = unit.submit_params()?;

        self.datasets
            .find_by_id(unit.dataset_id)
            .await?
            .ok_or(PipelineError::DatasetNotFound {
                id: unit.dataset_id,
            })?;

        let display_mode = match params.display_mode_id {
            Some(id) => {
                let mode = self
                    .datasets
                    .find_display_mode(id)
                    .await?
                    .ok_or(PipelineError::DisplayModeNotFound { id })?;
                if mode.dataset_id != unit.dataset_id {
                    return Err(PipelineError::InvalidJobParams(format!(
                        "显示模式 {} 不属于数据集 {}",
                        id, unit.dataset_id
                    )));
                }
                Some(mode)
            }
            None => None,
        };
        let identity = ImageIdentity::for_display_mode(display_mode.as_ref());

        let data_inputs = if params.kind.requires_probe_upload() {
            let probe = params.probe_file.as_deref().ok_or_else(|| {
                PipelineError::InvalidJobParams("单文件相似度检索需要 probe_file".to_string())
            })?;
            let probe_path = Path::new(probe);
            let uploaded = self.analysis.upload_file(probe_path).await?;
            let format = params
                .data_format
                .clone()
                .or_else(|| extension_of(probe))
                .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
            DataInputs::single(uploaded.uuid, format)
        } else {
            let images = self.images.list_ordered(unit.dataset_id).await?;
            if images.is_empty() {
                return Err(PipelineError::InvalidJobParams(format!(
                    "数据集 {} 没有图像",
                    unit.dataset_id
                )));
            }
            let paths: Vec<String> = images.iter().map(|i| identity.project(i)).collect();
            let format = params
                .data_format
                .clone()
                .or_else(|| display_mode.as_ref().map(|m| m.extension.trim_start_matches('.').to_string()))
                .or_else(|| extension_of(&paths[0]))
                .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
            DataInputs::files(paths, format)
        };

        let request = SubmitJobRequest {
            app: params.kind.app_name().to_string(),
            data_inputs,
            job_options: params.job_options.clone(),
        };
        let submitted = self.analysis.submit_job(&request).await?;

        let mut request_record = serde_json::to_value(&request)?;
        if let Some(probe) = &params.probe_file {
            request_record["probe_file"] = serde_json::Value::String(probe.clone());
        }

        let mut job = Job::new(
            unit.dataset_id,
            params.kind,
            request_record,
            submitted.raw.clone(),
            submitted.job_id.clone(),
        )
        .with_display_mode(params.display_mode_id);
        job.remote_state = submitted.state.clone();

        let created = self.jobs.create(&job).await?;
        info!("已提交: {}", created.entity_description());
        Ok(created)
    }
}

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[async_trait]
impl UnitHandler for SubmitAnalysisHandler {
    fn kind(&self) -> DatasetJobKind {
        DatasetJobKind::SubmitAnalysis
    }

    async fn handle(&self, unit: &DatasetJob) -> PipelineResult<()> {
        self.submit(unit).await.map(|_| ())
    }
}
