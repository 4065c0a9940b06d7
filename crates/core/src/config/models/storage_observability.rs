use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 作业工作目录与产物目录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 下载与解压目录，按作业划分子目录
    pub work_dir: PathBuf,
    /// 可视化产物（layout、hotspots）输出目录
    pub artifacts_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("data/work"),
            artifacts_dir: PathBuf::from("data/artifacts"),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("工作目录不能为空"));
        }

        if self.artifacts_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("产物目录不能为空"));
        }

        Ok(())
    }

    /// 作业的下载与解压目录
    pub fn job_work_dir(&self, job_id: i64) -> PathBuf {
        self.work_dir.join("jobs").join(job_id.to_string())
    }

    /// 作业的可视化产物目录
    pub fn job_artifacts_dir(&self, dataset_id: i64, job_id: i64) -> PathBuf {
        self.artifacts_dir
            .join(dataset_id.to_string())
            .join("jobs")
            .join(job_id.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }

        if self.metrics_enabled
            && self
                .metrics_bind_address
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(anyhow::anyhow!(
                "无效的指标监听地址: {}",
                self.metrics_bind_address
            ));
        }

        Ok(())
    }
}
