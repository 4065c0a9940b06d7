use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{Label, LabelRepository};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

pub struct SqliteLabelRepository {
    pool: SqlitePool,
}

impl SqliteLabelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LabelRepository for SqliteLabelRepository {
    async fn find_or_create(
        &self,
        dataset_id: i64,
        name: &str,
        color: &str,
    ) -> PipelineResult<Label> {
        // 依赖 UNIQUE(dataset_id, name)，并发创建时只有一条生效
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO labels (dataset_id, name, color) VALUES ($1, $2, $3)",
        )
        .bind(dataset_id)
        .bind(name)
        .bind(color)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        let row = sqlx::query(
            "SELECT id, dataset_id, name, color FROM labels WHERE dataset_id = $1 AND name = $2",
        )
        .bind(dataset_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        if inserted.rows_affected() > 0 {
            debug!("创建标签: 数据集 {}, 名称 {}", dataset_id, name);
        }

        Ok(Label {
            id: row.try_get("id")?,
            dataset_id: row.try_get("dataset_id")?,
            name: row.try_get("name")?,
            color: row.try_get("color")?,
        })
    }
}
