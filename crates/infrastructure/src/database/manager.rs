use anyhow::{Context, Result};
use analysis_core::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::migrations::run_migrations;
use super::sqlite::{
    SqliteDatasetJobRepository, SqliteDatasetRepository, SqliteImageRepository,
    SqliteJobRepository, SqliteLabelRepository, SqliteResultRepository,
};

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .context("解析数据库URL失败")?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let filename = connect_options.get_filename();
        if filename.to_str() != Some(":memory:") {
            if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("创建数据库目录失败: {}", parent.display()))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
            .connect_with(connect_options)
            .await
            .context("创建数据库连接池失败")?;

        info!("✅ 数据库连接池创建完成: {}", config.url);
        Ok(Self { pool })
    }

    /// 单连接内存数据库，连接不回收以保留数据
    pub async fn in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("解析数据库URL失败")?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context("创建内存数据库失败")?;

        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        run_migrations(&self.pool).await
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn job_repository(&self) -> Arc<SqliteJobRepository> {
        Arc::new(SqliteJobRepository::new(self.pool.clone()))
    }

    pub fn dataset_job_repository(&self) -> Arc<SqliteDatasetJobRepository> {
        Arc::new(SqliteDatasetJobRepository::new(self.pool.clone()))
    }

    pub fn dataset_repository(&self) -> Arc<SqliteDatasetRepository> {
        Arc::new(SqliteDatasetRepository::new(self.pool.clone()))
    }

    pub fn image_repository(&self) -> Arc<SqliteImageRepository> {
        Arc::new(SqliteImageRepository::new(self.pool.clone()))
    }

    pub fn label_repository(&self) -> Arc<SqliteLabelRepository> {
        Arc::new(SqliteLabelRepository::new(self.pool.clone()))
    }

    pub fn result_repository(&self) -> Arc<SqliteResultRepository> {
        Arc::new(SqliteResultRepository::new(self.pool.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_manager_migrates_and_is_healthy() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        assert!(manager.health_check().await.is_ok());

        // 迁移可重复执行
        manager.migrate().await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('jobs', 'dataset_jobs', 'clusters')",
        )
        .fetch_one(manager.pool())
        .await
        .unwrap();
        assert_eq!(count, 3);

        manager.close().await;
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("pipeline.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            ..DatabaseConfig::default()
        };

        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        assert!(db_path.exists());
        manager.close().await;
    }
}
