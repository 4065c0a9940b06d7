use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{DatasetJob, DatasetJobKind, DatasetJobRepository, ResultStatus};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

const DATASET_JOB_COLUMNS: &str = "id, dataset_id, kind, job_id, parameters, scheduler_handle, \
     status, error_message, created_at, started_at, finished_at";

pub struct SqliteDatasetJobRepository {
    pool: SqlitePool,
}

impl SqliteDatasetJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_dataset_job(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<DatasetJob> {
        let parameters: String = row.try_get("parameters")?;
        Ok(DatasetJob {
            id: row.try_get("id")?,
            dataset_id: row.try_get("dataset_id")?,
            kind: row.try_get("kind")?,
            job_id: row.try_get("job_id")?,
            parameters: serde_json::from_str(&parameters)?,
            scheduler_handle: row.try_get("scheduler_handle")?,
            status: row.try_get("status")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

#[async_trait]
impl DatasetJobRepository for SqliteDatasetJobRepository {
    #[instrument(skip(self, dataset_job), fields(
        dataset_id = %dataset_job.dataset_id,
        kind = %dataset_job.kind,
        job_id = ?dataset_job.job_id,
    ))]
    async fn create(&self, dataset_job: &DatasetJob) -> PipelineResult<DatasetJob> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO dataset_jobs (dataset_id, kind, job_id, parameters, scheduler_handle, status,
                                      error_message, created_at, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {DATASET_JOB_COLUMNS}
            "#
        ))
        .bind(dataset_job.dataset_id)
        .bind(dataset_job.kind)
        .bind(dataset_job.job_id)
        .bind(serde_json::to_string(&dataset_job.parameters)?)
        .bind(&dataset_job.scheduler_handle)
        .bind(dataset_job.status)
        .bind(&dataset_job.error_message)
        .bind(dataset_job.created_at)
        .bind(dataset_job.started_at)
        .bind(dataset_job.finished_at)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        let created = Self::row_to_dataset_job(&row)?;
        debug!("创建数据集作业成功: {}", created.entity_description());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> PipelineResult<Option<DatasetJob>> {
        let row = sqlx::query(&format!(
            "SELECT {DATASET_JOB_COLUMNS} FROM dataset_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_dataset_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_active(&self) -> PipelineResult<Vec<DatasetJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {DATASET_JOB_COLUMNS} FROM dataset_jobs \
             WHERE status IN ('NONE', 'RUNNING') ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        rows.iter().map(Self::row_to_dataset_job).collect()
    }

    async fn has_active(
        &self,
        dataset_id: i64,
        kind: DatasetJobKind,
        job_id: Option<i64>,
    ) -> PipelineResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM dataset_jobs \
             WHERE dataset_id = $1 AND kind = $2 AND job_id IS $3 \
             AND status IN ('NONE', 'RUNNING')",
        )
        .bind(dataset_id)
        .bind(kind)
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        Ok(count > 0)
    }

    async fn set_scheduler_handle(&self, id: i64, handle: &str) -> PipelineResult<()> {
        let result = sqlx::query("UPDATE dataset_jobs SET scheduler_handle = $2 WHERE id = $1")
            .bind(id)
            .bind(handle)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::DatasetJobNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self, error_message))]
    async fn update_status(
        &self,
        id: i64,
        from: ResultStatus,
        to: ResultStatus,
        error_message: Option<&str>,
    ) -> PipelineResult<()> {
        from.transition(to)?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE dataset_jobs
            SET status = $3,
                error_message = COALESCE($4, error_message),
                started_at = CASE WHEN $3 = 'RUNNING' THEN COALESCE(started_at, $5) ELSE started_at END,
                finished_at = CASE WHEN $3 IN ('COMPLETED', 'FAILED') THEN COALESCE(finished_at, $5) ELSE finished_at END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(id).await? {
                Some(current) => Err(PipelineError::InvalidStatusTransition {
                    from: current.status.to_string(),
                    to: to.to_string(),
                }),
                None => Err(PipelineError::DatasetJobNotFound { id }),
            };
        }

        debug!("更新数据集作业状态: {} {} -> {}", id, from, to);
        Ok(())
    }
}
