use analysis_core::{AnalysisApiConfig, PipelineError, PipelineResult};
use analysis_domain::{
    AnalysisService, JobStatusResponse, SubmitJobRequest, SubmitJobResponse, UploadResponse,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument};

/// 远程分析服务的 HTTP 客户端
pub struct AnalysisApiClient {
    base_url: String,
    api_token: Option<String>,
    download_timeout: Duration,
    http_client: reqwest::Client,
}

impl AnalysisApiClient {
    pub fn new(config: &AnalysisApiConfig) -> PipelineResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        let base_url = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };

        Ok(Self {
            base_url,
            api_token: config.api_token.clone(),
            download_timeout: Duration::from_secs(config.download_timeout_seconds),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> PipelineResult<reqwest::Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            error!("{} 请求失败: {}", action, e);
            PipelineError::Network(format!("{action}: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!("{} 失败: HTTP {} - {}", action, status, body);
        Err(PipelineError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, action: &str) -> PipelineResult<T> {
        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Network(format!("{action}: {e}")))?;
        serde_json::from_slice(&body).map_err(|e| {
            PipelineError::Serialization(format!(
                "{action} 响应解析失败: {e}; body: {}",
                String::from_utf8_lossy(&body)
            ))
        })
    }
}

#[async_trait]
impl AnalysisService for AnalysisApiClient {
    async fn describe(&self, app: &str) -> PipelineResult<serde_json::Value> {
        let url = self.url(&format!("app/{app}/describe"));
        let response = self.send(self.http_client.get(&url), "describe").await?;
        Self::parse(response, "describe").await
    }

    #[instrument(skip(self, request), fields(app = %request.app))]
    async fn submit_job(&self, request: &SubmitJobRequest) -> PipelineResult<SubmitJobResponse> {
        let url = self.url("job");
        let response = self
            .send(self.http_client.post(&url).json(request), "submit_job")
            .await?;

        let raw: serde_json::Value = Self::parse(response, "submit_job").await?;
        let mut submitted: SubmitJobResponse = serde_json::from_value(raw.clone())
            .map_err(|e| PipelineError::Serialization(format!("submit_job 响应缺少 job_id: {e}")))?;
        submitted.raw = raw;

        info!("远程作业已提交: {} ({})", submitted.job_id, request.app);
        Ok(submitted)
    }

    async fn get_job_status(&self, remote_job_id: &str) -> PipelineResult<JobStatusResponse> {
        let url = self.url(&format!("job/{remote_job_id}/status"));
        let response = self.send(self.http_client.get(&url), "get_job_status").await?;
        let status: JobStatusResponse = Self::parse(response, "get_job_status").await?;

        debug!("远程作业 {} 状态: {}", remote_job_id, status.state);
        Ok(status)
    }

    #[instrument(skip(self, dest))]
    async fn download_job_output(&self, remote_job_id: &str, dest: &Path) -> PipelineResult<u64> {
        let url = self.url(&format!("job/{remote_job_id}/output"));
        let started = Instant::now();
        let mut response = self
            .send(
                self.http_client.get(&url).timeout(self.download_timeout),
                "download_job_output",
            )
            .await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PipelineError::Network(format!("download_job_output: {e}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        metrics::counter!("analysis_api_download_bytes_total").increment(written);
        info!(
            "下载作业输出完成: {} -> {} ({} 字节, 耗时 {:?})",
            remote_job_id,
            dest.display(),
            written,
            started.elapsed()
        );
        Ok(written)
    }

    async fn upload_file(&self, path: &Path) -> PipelineResult<UploadResponse> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        let url = self.url("upload");
        let response = self
            .send(self.http_client.post(&url).multipart(form), "upload_file")
            .await?;
        let uploaded: UploadResponse = Self::parse(response, "upload_file").await?;

        info!("文件已上传: {} -> {}", path.display(), uploaded.uuid);
        Ok(uploaded)
    }
}
