//! SQLite 内存数据库测试环境

use analysis_domain::{Dataset, DisplayMode, Image, ImageRepository};
use analysis_infrastructure::DatabaseManager;
use anyhow::Result;

/// 已完成迁移的内存数据库，附带常用的数据准备方法
pub struct TestDatabase {
    pub db: DatabaseManager,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            db: DatabaseManager::in_memory().await?,
        })
    }

    /// 创建数据集并登记图像路径
    pub async fn seed_dataset(&self, name: &str, paths: &[&str]) -> Result<Dataset> {
        let dataset = self.db.dataset_repository().create_dataset(name).await?;
        let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        self.db
            .image_repository()
            .insert_paths(dataset.id, &paths)
            .await?;
        Ok(dataset)
    }

    pub async fn seed_display_mode(
        &self,
        dataset_id: i64,
        name: &str,
        extension: &str,
        directory: &str,
        is_source_format: bool,
    ) -> Result<DisplayMode> {
        Ok(self
            .db
            .dataset_repository()
            .create_display_mode(dataset_id, name, extension, directory, is_source_format)
            .await?)
    }

    pub async fn images(&self, dataset_id: i64) -> Result<Vec<Image>> {
        Ok(self.db.image_repository().list_ordered(dataset_id).await?)
    }

    pub async fn table_count(&self, table_name: &str) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {table_name}");
        let (count,): (i64,) = sqlx::query_as(&query).fetch_one(self.db.pool()).await?;
        Ok(count)
    }
}
