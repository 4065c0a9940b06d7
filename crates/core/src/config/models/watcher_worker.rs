use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 10,
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub max_concurrent_jobs: usize,
    /// 每批写入的结果条目数
    pub ingest_batch_size: usize,
    /// 每处理多少条记录输出一次进度日志
    pub progress_log_interval: usize,
    /// 流式读取通道容量
    pub stream_buffer_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_jobs: 4,
            ingest_batch_size: 1000,
            progress_log_interval: 1000,
            stream_buffer_size: 256,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("最大并发作业数必须大于0"));
        }

        if self.ingest_batch_size == 0 {
            return Err(anyhow::anyhow!("批处理大小必须大于0"));
        }

        if self.progress_log_interval == 0 {
            return Err(anyhow::anyhow!("进度日志间隔必须大于0"));
        }

        if self.stream_buffer_size == 0 {
            return Err(anyhow::anyhow!("流式读取缓冲区大小必须大于0"));
        }

        Ok(())
    }
}
