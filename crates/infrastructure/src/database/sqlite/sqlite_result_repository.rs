use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{
    AnalysisKind, Cluster, ClusterItem, ClusterSummary, IndividualSimilarRecord, OutlierRecord,
    Prediction, ResultRepository, SimilarRecord,
};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

/// 分析结果仓储，每次批量写入在单个事务中完成
pub struct SqliteResultRepository {
    pool: SqlitePool,
}

impl SqliteResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_cluster(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<Cluster> {
        Ok(Cluster {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            cluster_index: row.try_get("cluster_index")?,
            name: row.try_get("name")?,
        })
    }
}

#[async_trait]
impl ResultRepository for SqliteResultRepository {
    #[instrument(skip(self))]
    async fn clear_results(&self, job_id: i64, kind: AnalysisKind) -> PipelineResult<u64> {
        let sql = match kind {
            // 投影结果只写文件产物
            AnalysisKind::Projection => return Ok(0),
            AnalysisKind::Clustering => "DELETE FROM clusters WHERE job_id = $1",
            AnalysisKind::OutlierDetection => "DELETE FROM outliers WHERE job_id = $1",
            AnalysisKind::SimilaritySearch => "DELETE FROM similars WHERE job_id = $1",
            AnalysisKind::SingleFileSimilaritySearch => {
                "DELETE FROM individual_similars WHERE job_id = $1"
            }
            AnalysisKind::Classification => "DELETE FROM predictions WHERE job_id = $1",
        };

        let result = sqlx::query(sql)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::Database)?;

        debug!(
            "清除作业 {} 的旧结果: {} 条",
            job_id,
            result.rows_affected()
        );
        Ok(result.rows_affected())
    }

    async fn insert_outliers(&self, records: &[OutlierRecord]) -> PipelineResult<()> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::Database)?;
        for record in records {
            sqlx::query(
                "INSERT INTO outliers (job_id, image_id, is_outlier, score) VALUES ($1, $2, $3, $4)",
            )
            .bind(record.job_id)
            .bind(record.image_id)
            .bind(record.is_outlier)
            .bind(record.score)
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::Database)?;
        }
        tx.commit().await.map_err(PipelineError::Database)?;
        Ok(())
    }

    async fn insert_similars(&self, records: &[SimilarRecord]) -> PipelineResult<()> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::Database)?;
        for record in records {
            sqlx::query(
                "INSERT INTO similars (job_id, image_id, neighbors, highest_score) VALUES ($1, $2, $3, $4)",
            )
            .bind(record.job_id)
            .bind(record.image_id)
            .bind(serde_json::to_string(&record.neighbors)?)
            .bind(record.highest_score)
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::Database)?;
        }
        tx.commit().await.map_err(PipelineError::Database)?;
        Ok(())
    }

    async fn insert_individual_similar(
        &self,
        record: &IndividualSimilarRecord,
    ) -> PipelineResult<()> {
        sqlx::query(
            "INSERT INTO individual_similars (job_id, probe_path, neighbors) VALUES ($1, $2, $3)",
        )
        .bind(record.job_id)
        .bind(&record.probe_path)
        .bind(serde_json::to_string(&record.neighbors)?)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Database)?;
        Ok(())
    }

    async fn create_cluster(
        &self,
        job_id: i64,
        cluster_index: i64,
        name: &str,
    ) -> PipelineResult<Cluster> {
        let row = sqlx::query(
            r#"
            INSERT INTO clusters (job_id, cluster_index, name) VALUES ($1, $2, $3)
            RETURNING id, job_id, cluster_index, name
            "#,
        )
        .bind(job_id)
        .bind(cluster_index)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        Self::row_to_cluster(&row)
    }

    async fn insert_cluster_items(&self, items: &[ClusterItem]) -> PipelineResult<()> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::Database)?;
        for item in items {
            sqlx::query(
                "INSERT INTO cluster_items (cluster_id, image_id, probability, outlier_score) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(item.cluster_id)
            .bind(item.image_id)
            .bind(item.probability)
            .bind(item.outlier_score)
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::Database)?;
        }
        tx.commit().await.map_err(PipelineError::Database)?;
        Ok(())
    }

    async fn insert_predictions(&self, records: &[Prediction]) -> PipelineResult<()> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::Database)?;
        for record in records {
            sqlx::query(
                "INSERT INTO predictions (job_id, image_id, label_id, probability) VALUES ($1, $2, $3, $4)",
            )
            .bind(record.job_id)
            .bind(record.image_id)
            .bind(record.label_id)
            .bind(record.probability)
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::Database)?;
        }
        tx.commit().await.map_err(PipelineError::Database)?;
        Ok(())
    }

    async fn find_clusters(&self, job_id: i64) -> PipelineResult<Vec<ClusterSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.job_id, c.cluster_index, c.name, COUNT(ci.id) AS size
            FROM clusters c
            LEFT JOIN cluster_items ci ON ci.cluster_id = c.id
            WHERE c.job_id = $1
            GROUP BY c.id, c.job_id, c.cluster_index, c.name
            ORDER BY c.cluster_index
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(ClusterSummary {
                    cluster: Self::row_to_cluster(row)?,
                    size: row.try_get("size")?,
                })
            })
            .collect()
    }

    async fn find_outliers(&self, job_id: i64) -> PipelineResult<Vec<OutlierRecord>> {
        let rows = sqlx::query(
            "SELECT job_id, image_id, is_outlier, score FROM outliers WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(OutlierRecord {
                    job_id: row.try_get("job_id")?,
                    image_id: row.try_get("image_id")?,
                    is_outlier: row.try_get("is_outlier")?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }

    async fn find_similars(&self, job_id: i64) -> PipelineResult<Vec<SimilarRecord>> {
        let rows = sqlx::query(
            "SELECT job_id, image_id, neighbors, highest_score FROM similars WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        rows.iter()
            .map(|row| {
                let neighbors: String = row.try_get("neighbors")?;
                Ok(SimilarRecord {
                    job_id: row.try_get("job_id")?,
                    image_id: row.try_get("image_id")?,
                    neighbors: serde_json::from_str(&neighbors)?,
                    highest_score: row.try_get("highest_score")?,
                })
            })
            .collect()
    }

    async fn find_individual_similar(
        &self,
        job_id: i64,
    ) -> PipelineResult<Option<IndividualSimilarRecord>> {
        let row = sqlx::query(
            "SELECT job_id, probe_path, neighbors FROM individual_similars WHERE job_id = $1 \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        match row {
            Some(row) => {
                let neighbors: String = row.try_get("neighbors")?;
                Ok(Some(IndividualSimilarRecord {
                    job_id: row.try_get("job_id")?,
                    probe_path: row.try_get("probe_path")?,
                    neighbors: serde_json::from_str(&neighbors)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn find_predictions(&self, job_id: i64) -> PipelineResult<Vec<Prediction>> {
        let rows = sqlx::query(
            "SELECT job_id, image_id, label_id, probability FROM predictions WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(Prediction {
                    job_id: row.try_get("job_id")?,
                    image_id: row.try_get("image_id")?,
                    label_id: row.try_get("label_id")?,
                    probability: row.try_get("probability")?,
                })
            })
            .collect()
    }
}
