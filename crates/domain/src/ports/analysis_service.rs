use analysis_core::PipelineResult;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// 远程服务中仍在进行的状态，其余状态均视为终态
const NON_TERMINAL_STATES: [&str; 3] = ["PENDING", "STARTED", "RUNNING"];

/// 远程服务中表示成功的终态
const SUCCESS_STATES: [&str; 4] = ["SUCCESS", "SUCCEEDED", "COMPLETED", "DONE"];

pub fn is_terminal_state(state: &str) -> bool {
    let state = state.trim().to_ascii_uppercase();
    !NON_TERMINAL_STATES.contains(&state.as_str())
}

pub fn is_success_state(state: &str) -> bool {
    let state = state.trim().to_ascii_uppercase();
    SUCCESS_STATES.contains(&state.as_str())
}

/// 标量或数组，序列化时保持原形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInputs {
    pub data: OneOrMany<String>,
    pub format: OneOrMany<String>,
}

impl DataInputs {
    /// 多文件输入，所有文件共用一个格式
    pub fn files(paths: Vec<String>, format: impl Into<String>) -> Self {
        Self {
            data: OneOrMany::Many(paths),
            format: OneOrMany::One(format.into()),
        }
    }

    /// 单个已上传文件
    pub fn single(reference: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            data: OneOrMany::One(reference.into()),
            format: OneOrMany::One(format.into()),
        }
    }
}

/// 提交请求体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub app: String,
    pub data_inputs: DataInputs,
    pub job_options: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub submit_date: Option<String>,
    /// 完整响应体，原样持久化
    #[serde(skip)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub state: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub exit_status: Option<i64>,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
}

impl JobStatusResponse {
    pub fn is_terminal(&self) -> bool {
        is_terminal_state(&self.state)
    }

    pub fn is_success(&self) -> bool {
        is_success_state(&self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub uuid: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// 远程分析服务接口
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// 查询应用的参数描述
    async fn describe(&self, app: &str) -> PipelineResult<serde_json::Value>;
    async fn submit_job(&self, request: &SubmitJobRequest) -> PipelineResult<SubmitJobResponse>;
    async fn get_job_status(&self, remote_job_id: &str) -> PipelineResult<JobStatusResponse>;
    /// 将作业输出流式写入 `dest`，返回写入字节数
    async fn download_job_output(&self, remote_job_id: &str, dest: &Path) -> PipelineResult<u64>;
    async fn upload_file(&self, path: &Path) -> PipelineResult<UploadResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_state_classification() {
        assert!(!is_terminal_state("PENDING"));
        assert!(!is_terminal_state("started"));
        assert!(!is_terminal_state("RUNNING"));
        assert!(is_terminal_state("SUCCESS"));
        assert!(is_terminal_state("FAILED"));
        assert!(is_terminal_state("REVOKED"));

        assert!(is_success_state("SUCCESS"));
        assert!(is_success_state("done"));
        assert!(!is_success_state("FAILURE"));
    }

    #[test]
    fn test_data_inputs_serialization_shapes() {
        let multi = DataInputs::files(vec!["a.png".into(), "b.png".into()], "png");
        assert_eq!(
            serde_json::to_value(&multi).unwrap(),
            serde_json::json!({"data": ["a.png", "b.png"], "format": "png"})
        );

        let single = DataInputs::single("0b1c", "png");
        assert_eq!(
            serde_json::to_value(&single).unwrap(),
            serde_json::json!({"data": "0b1c", "format": "png"})
        );
    }

    #[test]
    fn test_submit_response_accepts_numeric_job_id() {
        let response: SubmitJobResponse =
            serde_json::from_str(r#"{"job_id": 123, "state": "PENDING"}"#).unwrap();
        assert_eq!(response.job_id, "123");
        assert_eq!(response.state.as_deref(), Some("PENDING"));
    }
}
