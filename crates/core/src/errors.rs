use thiserror::Error;

/// 流水线错误类型定义
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("分析作业未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("数据集作业未找到: {id}")]
    DatasetJobNotFound { id: i64 },

    #[error("数据集未找到: {id}")]
    DatasetNotFound { id: i64 },

    #[error("显示模式未找到: {id}")]
    DisplayModeNotFound { id: i64 },

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("数据集 {dataset_id} 已有进行中的 {kind} 作业")]
    AlreadyActive { dataset_id: i64, kind: String },

    #[error("分析服务返回错误: HTTP {status} - {body}")]
    Api { status: u16, body: String },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("结果文件 {expected} 匹配数量为 {matches}，必须恰好为1")]
    ResultFileMismatch { expected: String, matches: usize },

    #[error("不支持的分析类型: {0}")]
    UnsupportedAnalysisKind(String),

    #[error("归档处理错误: {0}")]
    Archive(String),

    #[error("结果数据错误: {0}")]
    ResultData(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO错误: {0}")]
    Io(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("作业执行错误: {0}")]
    JobExecution(String),

    #[error("无效的作业参数: {0}")]
    InvalidJobParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl PipelineError {
    /// 外部调用失败（网络或非2xx响应）
    pub fn is_external(&self) -> bool {
        matches!(self, PipelineError::Api { .. } | PipelineError::Network(_))
    }

    /// 结构性错误，重新执行也不会成功
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PipelineError::ResultFileMismatch { .. }
                | PipelineError::UnsupportedAnalysisKind(_)
                | PipelineError::Archive(_)
        )
    }
}

/// 统一的Result类型
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
