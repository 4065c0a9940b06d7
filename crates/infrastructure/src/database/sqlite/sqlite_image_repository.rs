use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{Image, ImageRepository};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use tracing::debug;

/// 单条 IN 查询的参数上限，低于 SQLite 的变量数限制
const LOOKUP_CHUNK_SIZE: usize = 500;

pub struct SqliteImageRepository {
    pool: SqlitePool,
}

impl SqliteImageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_image(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<Image> {
        Ok(Image {
            id: row.try_get("id")?,
            dataset_id: row.try_get("dataset_id")?,
            path: row.try_get("path")?,
            name: row.try_get("name")?,
        })
    }

    /// 批量登记图像，名称取文件名去掉扩展名；已存在的路径被忽略
    pub async fn insert_paths(&self, dataset_id: i64, paths: &[String]) -> PipelineResult<u64> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::Database)?;
        let mut inserted = 0;

        for path in paths {
            let name = Path::new(path)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(path.as_str());
            let result = sqlx::query(
                "INSERT OR IGNORE INTO images (dataset_id, path, name) VALUES ($1, $2, $3)",
            )
            .bind(dataset_id)
            .bind(path)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::Database)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(PipelineError::Database)?;
        debug!("登记图像: 数据集 {}, 新增 {}", dataset_id, inserted);
        Ok(inserted)
    }

    async fn find_by_column(
        &self,
        dataset_id: i64,
        column: &str,
        values: &[String],
    ) -> PipelineResult<Vec<Image>> {
        let mut images = Vec::new();

        for chunk in values.chunks(LOOKUP_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, dataset_id, path, name FROM images WHERE dataset_id = ",
            );
            builder.push_bind(dataset_id);
            builder.push(format!(" AND {column} IN ("));
            let mut separated = builder.separated(", ");
            for value in chunk {
                separated.push_bind(value);
            }
            separated.push_unseparated(")");

            let rows = builder
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(PipelineError::Database)?;
            for row in &rows {
                images.push(Self::row_to_image(row)?);
            }
        }

        Ok(images)
    }
}

#[async_trait]
impl ImageRepository for SqliteImageRepository {
    async fn list_ordered(&self, dataset_id: i64) -> PipelineResult<Vec<Image>> {
        let rows = sqlx::query(
            "SELECT id, dataset_id, path, name FROM images WHERE dataset_id = $1 ORDER BY path",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        rows.iter().map(Self::row_to_image).collect()
    }

    async fn find_by_paths(&self, dataset_id: i64, paths: &[String]) -> PipelineResult<Vec<Image>> {
        self.find_by_column(dataset_id, "path", paths).await
    }

    async fn find_by_names(&self, dataset_id: i64, names: &[String]) -> PipelineResult<Vec<Image>> {
        self.find_by_column(dataset_id, "name", names).await
    }
}
