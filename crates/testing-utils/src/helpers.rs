//! 测试辅助工具：条件等待、日志初始化、结果归档构造

use flate2::write::GzEncoder;
use flate2::Compression;
use std::time::Duration;
use tokio::time::sleep;

/// 测试环境工具
pub struct TestEnv;

impl TestEnv {
    /// 在超时前轮询等待条件成立
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }

    /// 初始化测试日志（每个测试二进制调用一次即可）
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }
}

/// 结果文件与归档构造
pub struct Fixtures;

impl Fixtures {
    /// `{"data": [...]}` 形式的结果文件内容
    pub fn result_json(items: &[serde_json::Value]) -> String {
        serde_json::json!({ "data": items }).to_string()
    }

    /// 构造 gzip 压缩的 tar 归档
    pub fn archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .expect("写入归档条目失败");
        }
        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .expect("完成归档失败")
    }

    /// 只包含一个结果文件的归档
    pub fn result_archive(file_name: &str, items: &[serde_json::Value]) -> Vec<u8> {
        let path = format!("output/{file_name}");
        Self::archive(&[(path.as_str(), Self::result_json(items).as_str())])
    }
}
