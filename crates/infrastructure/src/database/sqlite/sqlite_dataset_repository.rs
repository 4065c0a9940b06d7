use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{Dataset, DatasetRepository, DisplayMode};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// 数据集与显示模式；写入方法供命令行导入与测试使用
pub struct SqliteDatasetRepository {
    pool: SqlitePool,
}

impl SqliteDatasetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_display_mode(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<DisplayMode> {
        Ok(DisplayMode {
            id: row.try_get("id")?,
            dataset_id: row.try_get("dataset_id")?,
            name: row.try_get("name")?,
            extension: row.try_get("extension")?,
            directory: row.try_get("directory")?,
            is_source_format: row.try_get("is_source_format")?,
        })
    }

    pub async fn create_dataset(&self, name: &str) -> PipelineResult<Dataset> {
        let created_at = Utc::now();
        let id: i64 =
            sqlx::query_scalar("INSERT INTO datasets (name, created_at) VALUES ($1, $2) RETURNING id")
                .bind(name)
                .bind(created_at)
                .fetch_one(&self.pool)
                .await
                .map_err(PipelineError::Database)?;

        debug!("创建数据集: {} ({})", name, id);
        Ok(Dataset {
            id,
            name: name.to_string(),
            created_at,
        })
    }

    pub async fn create_display_mode(
        &self,
        dataset_id: i64,
        name: &str,
        extension: &str,
        directory: &str,
        is_source_format: bool,
    ) -> PipelineResult<DisplayMode> {
        let row = sqlx::query(
            r#"
            INSERT INTO display_modes (dataset_id, name, extension, directory, is_source_format)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, dataset_id, name, extension, directory, is_source_format
            "#,
        )
        .bind(dataset_id)
        .bind(name)
        .bind(extension)
        .bind(directory)
        .bind(is_source_format)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        Self::row_to_display_mode(&row)
    }
}

#[async_trait]
impl DatasetRepository for SqliteDatasetRepository {
    async fn find_by_id(&self, id: i64) -> PipelineResult<Option<Dataset>> {
        let row = sqlx::query("SELECT id, name, created_at FROM datasets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::Database)?;

        match row {
            Some(row) => Ok(Some(Dataset {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                created_at: row.try_get("created_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn find_display_mode(&self, id: i64) -> PipelineResult<Option<DisplayMode>> {
        let row = sqlx::query(
            "SELECT id, dataset_id, name, extension, directory, is_source_format \
             FROM display_modes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_display_mode(&row)?)),
            None => Ok(None),
        }
    }
}
