use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{Job, JobRepository, ResultStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

const JOB_COLUMNS: &str = "id, dataset_id, kind, request, response, remote_job_id, remote_state, \
     remote_status, result_status, error_message, started_at, finished_at, display_mode_id, \
     ingest_handle, created_at";

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> PipelineResult<Job> {
        let request: String = row.try_get("request")?;
        let response: String = row.try_get("response")?;
        Ok(Job {
            id: row.try_get("id")?,
            dataset_id: row.try_get("dataset_id")?,
            kind: row.try_get("kind")?,
            request: serde_json::from_str(&request)?,
            response: serde_json::from_str(&response)?,
            remote_job_id: row.try_get("remote_job_id")?,
            remote_state: row.try_get("remote_state")?,
            remote_status: row.try_get("remote_status")?,
            result_status: row.try_get("result_status")?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            display_mode_id: row.try_get("display_mode_id")?,
            ingest_handle: row.try_get("ingest_handle")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn fetch_jobs(&self, sql: &str, status: Option<ResultStatus>) -> PipelineResult<Vec<Job>> {
        let mut query = sqlx::query(sql);
        if let Some(status) = status {
            query = query.bind(status);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(PipelineError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job), fields(dataset_id = %job.dataset_id, kind = %job.kind))]
    async fn create(&self, job: &Job) -> PipelineResult<Job> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (dataset_id, kind, request, response, remote_job_id, remote_state,
                              remote_status, result_status, error_message, started_at, finished_at,
                              display_mode_id, ingest_handle, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.dataset_id)
        .bind(job.kind)
        .bind(serde_json::to_string(&job.request)?)
        .bind(serde_json::to_string(&job.response)?)
        .bind(&job.remote_job_id)
        .bind(&job.remote_state)
        .bind(&job.remote_status)
        .bind(job.result_status)
        .bind(&job.error_message)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.display_mode_id)
        .bind(&job.ingest_handle)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        let created = Self::row_to_job(&row)?;
        debug!("创建分析作业成功: {}", created.entity_description());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> PipelineResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_by_dataset(&self, dataset_id: i64) -> PipelineResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE dataset_id = $1 ORDER BY id DESC"
        ))
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn find_unprocessed(&self) -> PipelineResult<Vec<Job>> {
        self.fetch_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs \
                 WHERE result_status = 'NONE' AND remote_job_id IS NOT NULL ORDER BY id"
            ),
            None,
        )
        .await
    }

    async fn find_by_result_status(&self, status: ResultStatus) -> PipelineResult<Vec<Job>> {
        self.fetch_jobs(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE result_status = $1 ORDER BY id"),
            Some(status),
        )
        .await
    }

    async fn update_remote_state(
        &self,
        id: i64,
        remote_state: &str,
        remote_status: Option<&str>,
    ) -> PipelineResult<()> {
        let result = sqlx::query("UPDATE jobs SET remote_state = $2, remote_status = $3 WHERE id = $1")
            .bind(id)
            .bind(remote_state)
            .bind(remote_status)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::JobNotFound { id });
        }

        debug!("更新远程状态: 作业 {} -> {}", id, remote_state);
        Ok(())
    }

    async fn record_ingest_enqueued(
        &self,
        id: i64,
        ingest_handle: &str,
        finished_at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        let result = sqlx::query("UPDATE jobs SET ingest_handle = $2, finished_at = $3 WHERE id = $1")
            .bind(id)
            .bind(ingest_handle)
            .bind(finished_at)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::JobNotFound { id });
        }

        debug!("记录结果处理句柄: 作业 {} -> {}", id, ingest_handle);
        Ok(())
    }

    #[instrument(skip(self, error_message))]
    async fn update_result_status(
        &self,
        id: i64,
        from: ResultStatus,
        to: ResultStatus,
        error_message: Option<&str>,
    ) -> PipelineResult<()> {
        from.transition(to)?;

        let result = sqlx::query(
            "UPDATE jobs SET result_status = $3, error_message = COALESCE($4, error_message) \
             WHERE id = $1 AND result_status = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(id).await? {
                Some(current) => Err(PipelineError::InvalidStatusTransition {
                    from: current.result_status.to_string(),
                    to: to.to_string(),
                }),
                None => Err(PipelineError::JobNotFound { id }),
            };
        }

        debug!("更新作业结果状态: {} {} -> {}", id, from, to);
        Ok(())
    }

    async fn reset_for_reprocess(&self, id: i64) -> PipelineResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET result_status = 'NONE', error_message = NULL, ingest_handle = NULL \
             WHERE id = $1 AND result_status IN ('COMPLETED', 'FAILED')",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Database)?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(id).await? {
                Some(current) => Err(PipelineError::InvalidStatusTransition {
                    from: current.result_status.to_string(),
                    to: ResultStatus::None.to_string(),
                }),
                None => Err(PipelineError::JobNotFound { id }),
            };
        }

        debug!("作业 {} 已重置为待处理", id);
        Ok(())
    }

    async fn clear_ingest_handle(&self, id: i64) -> PipelineResult<()> {
        let result = sqlx::query("UPDATE jobs SET ingest_handle = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::JobNotFound { id });
        }
        Ok(())
    }
}
