use analysis_core::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 远程分析服务支持的分析类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    #[serde(rename = "PROJECTION")]
    Projection,
    #[serde(rename = "CLUSTERING")]
    Clustering,
    #[serde(rename = "OUTLIER_DETECTION")]
    OutlierDetection,
    #[serde(rename = "SIMILARITY_SEARCH")]
    SimilaritySearch,
    #[serde(rename = "SINGLE_FILE_SIMILARITY_SEARCH")]
    SingleFileSimilaritySearch,
    #[serde(rename = "CLASSIFICATION")]
    Classification,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 6] = [
        AnalysisKind::Projection,
        AnalysisKind::Clustering,
        AnalysisKind::OutlierDetection,
        AnalysisKind::SimilaritySearch,
        AnalysisKind::SingleFileSimilaritySearch,
        AnalysisKind::Classification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Projection => "PROJECTION",
            AnalysisKind::Clustering => "CLUSTERING",
            AnalysisKind::OutlierDetection => "OUTLIER_DETECTION",
            AnalysisKind::SimilaritySearch => "SIMILARITY_SEARCH",
            AnalysisKind::SingleFileSimilaritySearch => "SINGLE_FILE_SIMILARITY_SEARCH",
            AnalysisKind::Classification => "CLASSIFICATION",
        }
    }

    /// 远程服务上对应的应用名
    pub fn app_name(&self) -> &'static str {
        match self {
            AnalysisKind::Projection => "umap",
            AnalysisKind::Clustering => "hdbscan",
            AnalysisKind::OutlierDetection => "outlier-detection",
            AnalysisKind::SimilaritySearch => "similarity-search",
            AnalysisKind::SingleFileSimilaritySearch => "similarity-search-single",
            AnalysisKind::Classification => "classification",
        }
    }

    /// 是否需要先上传一个探针文件
    pub fn requires_probe_upload(&self) -> bool {
        matches!(self, AnalysisKind::SingleFileSimilaritySearch)
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        AnalysisKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| PipelineError::UnsupportedAnalysisKind(s.to_string()))
    }
}

/// 结果状态机：None -> Running -> {Completed, Failed}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResultStatus {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::None => "NONE",
            ResultStatus::Running => "RUNNING",
            ResultStatus::Completed => "COMPLETED",
            ResultStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResultStatus::Completed | ResultStatus::Failed)
    }

    pub fn can_transition_to(&self, next: ResultStatus) -> bool {
        matches!(
            (self, next),
            (ResultStatus::None, ResultStatus::Running)
                | (ResultStatus::Running, ResultStatus::Completed)
                | (ResultStatus::Running, ResultStatus::Failed)
        )
    }

    /// 校验并返回目标状态
    pub fn transition(&self, next: ResultStatus) -> PipelineResult<ResultStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PipelineError::InvalidStatusTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(ResultStatus::None),
            "RUNNING" => Ok(ResultStatus::Running),
            "COMPLETED" => Ok(ResultStatus::Completed),
            "FAILED" => Ok(ResultStatus::Failed),
            _ => Err(PipelineError::Serialization(format!(
                "Invalid result status: {s}"
            ))),
        }
    }
}

/// 提交给远程服务的一次分析运行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub dataset_id: i64,
    pub kind: AnalysisKind,
    /// 提交请求体
    pub request: serde_json::Value,
    /// 提交时的远程响应
    pub response: serde_json::Value,
    pub remote_job_id: Option<String>,
    pub remote_state: Option<String>,
    pub remote_status: Option<String>,
    pub result_status: ResultStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    /// 远程运行进入终态的时间，由Watcher记录
    pub finished_at: Option<DateTime<Utc>>,
    pub display_mode_id: Option<i64>,
    /// 已入队的结果处理单元句柄
    pub ingest_handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        dataset_id: i64,
        kind: AnalysisKind,
        request: serde_json::Value,
        response: serde_json::Value,
        remote_job_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            dataset_id,
            kind,
            request,
            response,
            remote_job_id: Some(remote_job_id),
            remote_state: None,
            remote_status: None,
            result_status: ResultStatus::None,
            error_message: None,
            started_at: now,
            finished_at: None,
            display_mode_id: None,
            ingest_handle: None,
            created_at: now,
        }
    }

    pub fn with_display_mode(mut self, display_mode_id: Option<i64>) -> Self {
        self.display_mode_id = display_mode_id;
        self
    }

    /// 是否仍等待结果处理
    pub fn awaiting_ingest(&self) -> bool {
        self.result_status == ResultStatus::None
            && self.remote_job_id.is_some()
            && self.ingest_handle.is_none()
    }

    pub fn entity_description(&self) -> String {
        match &self.remote_job_id {
            Some(remote) => format!(
                "分析作业 (ID: {}, 类型: {}, 远程ID: {})",
                self.id, self.kind, remote
            ),
            None => format!("分析作业 (ID: {}, 类型: {})", self.id, self.kind),
        }
    }
}

/// 数据集作业类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DatasetJobKind {
    #[serde(rename = "SUBMIT_ANALYSIS")]
    SubmitAnalysis,
    #[serde(rename = "INGEST_OUTPUT")]
    IngestOutput,
}

impl DatasetJobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetJobKind::SubmitAnalysis => "SUBMIT_ANALYSIS",
            DatasetJobKind::IngestOutput => "INGEST_OUTPUT",
        }
    }

    /// 同一数据集、同一作业上同时只能有一个活动单元
    pub fn is_exclusive(&self) -> bool {
        matches!(self, DatasetJobKind::IngestOutput)
    }
}

impl fmt::Display for DatasetJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetJobKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMIT_ANALYSIS" => Ok(DatasetJobKind::SubmitAnalysis),
            "INGEST_OUTPUT" => Ok(DatasetJobKind::IngestOutput),
            _ => Err(PipelineError::Serialization(format!(
                "Invalid dataset job kind: {s}"
            ))),
        }
    }
}

/// 针对数据集排队执行的后台工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetJob {
    pub id: i64,
    pub dataset_id: i64,
    pub kind: DatasetJobKind,
    pub job_id: Option<i64>,
    pub parameters: serde_json::Value,
    pub scheduler_handle: Option<String>,
    pub status: ResultStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DatasetJob {
    pub fn new(
        dataset_id: i64,
        kind: DatasetJobKind,
        job_id: Option<i64>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            dataset_id,
            kind,
            job_id,
            parameters,
            scheduler_handle: None,
            status: ResultStatus::None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn update_status(&mut self, status: ResultStatus) -> PipelineResult<()> {
        self.status = self.status.transition(status)?;
        match status {
            ResultStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            ResultStatus::Completed | ResultStatus::Failed => {
                if self.finished_at.is_none() {
                    self.finished_at = Some(Utc::now());
                }
            }
            ResultStatus::None => {}
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// 解析提交参数
    pub fn submit_params(&self) -> PipelineResult<SubmitAnalysisParams> {
        serde_json::from_value(self.parameters.clone())
            .map_err(|e| PipelineError::InvalidJobParams(e.to_string()))
    }

    pub fn entity_description(&self) -> String {
        match self.job_id {
            Some(job_id) => format!(
                "数据集作业 (ID: {}, 类型: {}, 数据集: {}, 分析作业: {})",
                self.id, self.kind, self.dataset_id, job_id
            ),
            None => format!(
                "数据集作业 (ID: {}, 类型: {}, 数据集: {})",
                self.id, self.kind, self.dataset_id
            ),
        }
    }
}

/// 提交分析单元的参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitAnalysisParams {
    #[serde(alias = "analysis_kind")]
    pub kind: AnalysisKind,
    #[serde(default)]
    pub display_mode_id: Option<i64>,
    /// 数据输入格式，默认为显示模式的扩展名
    #[serde(default)]
    pub data_format: Option<String>,
    #[serde(default = "default_job_options", alias = "options")]
    pub job_options: serde_json::Value,
    /// 单文件相似度检索的探针文件
    #[serde(default, alias = "probe_path")]
    pub probe_file: Option<String>,
}

fn default_job_options() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// 图像的一种存储表示
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayMode {
    pub id: i64,
    pub dataset_id: i64,
    pub name: String,
    pub extension: String,
    pub directory: String,
    /// 是否为图像原始存储格式
    pub is_source_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    pub id: i64,
    pub dataset_id: i64,
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Label {
    pub id: i64,
    pub dataset_id: i64,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutlierRecord {
    pub job_id: i64,
    pub image_id: i64,
    pub is_outlier: bool,
    pub score: f64,
}

/// 近邻列表中的一项
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Neighbor {
    pub image_id: Option<i64>,
    pub path: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarRecord {
    pub job_id: i64,
    pub image_id: i64,
    pub neighbors: Vec<Neighbor>,
    pub highest_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndividualSimilarRecord {
    pub job_id: i64,
    pub probe_path: String,
    pub neighbors: Vec<Neighbor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: i64,
    pub job_id: i64,
    /// 远程给出的簇编号，-1表示噪声
    pub cluster_index: i64,
    pub name: String,
}

impl Cluster {
    pub fn display_name(cluster_index: i64) -> String {
        format!("Cluster {cluster_index}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterItem {
    pub cluster_id: i64,
    pub image_id: i64,
    pub probability: f64,
    pub outlier_score: f64,
}

/// 簇及其成员数量
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cluster: Cluster,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub job_id: i64,
    pub image_id: i64,
    pub label_id: i64,
    pub probability: f64,
}
