use serde::{Deserialize, Serialize};

/// 外部分析服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisApiConfig {
    /// 服务根地址，例如 `http://analysis.internal:8000/api/`
    pub base_url: String,
    pub request_timeout_seconds: u64,
    /// 下载作业输出的超时时间，归档可能很大
    pub download_timeout_seconds: u64,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for AnalysisApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/".to_string(),
            request_timeout_seconds: 60,
            download_timeout_seconds: 3600,
            api_token: None,
        }
    }
}

impl AnalysisApiConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.is_empty() {
            return Err(anyhow::anyhow!("分析服务地址不能为空"));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "分析服务地址必须以http://或https://开头: {}",
                self.base_url
            ));
        }

        if self.request_timeout_seconds == 0 || self.download_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("分析服务超时时间必须大于0"));
        }

        Ok(())
    }
}
