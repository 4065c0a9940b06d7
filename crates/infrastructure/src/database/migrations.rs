use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

const TABLES: &[(&str, &str)] = &[
    (
        "数据集表",
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "显示模式表",
        r#"
        CREATE TABLE IF NOT EXISTS display_modes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            extension TEXT NOT NULL,
            directory TEXT NOT NULL,
            is_source_format INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (dataset_id) REFERENCES datasets (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "图像表",
        r#"
        CREATE TABLE IF NOT EXISTS images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (dataset_id, path),
            FOREIGN KEY (dataset_id) REFERENCES datasets (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "标签表",
        r#"
        CREATE TABLE IF NOT EXISTS labels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            UNIQUE (dataset_id, name),
            FOREIGN KEY (dataset_id) REFERENCES datasets (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "分析作业表",
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            request TEXT NOT NULL DEFAULT '{}',
            response TEXT NOT NULL DEFAULT '{}',
            remote_job_id TEXT,
            remote_state TEXT,
            remote_status TEXT,
            result_status TEXT NOT NULL DEFAULT 'NONE',
            error_message TEXT,
            started_at DATETIME NOT NULL,
            finished_at DATETIME,
            display_mode_id INTEGER,
            ingest_handle TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (dataset_id) REFERENCES datasets (id) ON DELETE CASCADE,
            FOREIGN KEY (display_mode_id) REFERENCES display_modes (id) ON DELETE SET NULL
        )
        "#,
    ),
    (
        "数据集作业表",
        r#"
        CREATE TABLE IF NOT EXISTS dataset_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            job_id INTEGER,
            parameters TEXT NOT NULL DEFAULT '{}',
            scheduler_handle TEXT,
            status TEXT NOT NULL DEFAULT 'NONE',
            error_message TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            started_at DATETIME,
            finished_at DATETIME,
            FOREIGN KEY (dataset_id) REFERENCES datasets (id) ON DELETE CASCADE,
            FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "异常值结果表",
        r#"
        CREATE TABLE IF NOT EXISTS outliers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            image_id INTEGER NOT NULL,
            is_outlier INTEGER NOT NULL,
            score REAL NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE,
            FOREIGN KEY (image_id) REFERENCES images (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "相似度结果表",
        r#"
        CREATE TABLE IF NOT EXISTS similars (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            image_id INTEGER NOT NULL,
            neighbors TEXT NOT NULL DEFAULT '[]',
            highest_score REAL NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE,
            FOREIGN KEY (image_id) REFERENCES images (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "单文件相似度结果表",
        r#"
        CREATE TABLE IF NOT EXISTS individual_similars (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            probe_path TEXT NOT NULL,
            neighbors TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "聚类表",
        r#"
        CREATE TABLE IF NOT EXISTS clusters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            cluster_index INTEGER NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (job_id, cluster_index),
            FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "聚类成员表",
        r#"
        CREATE TABLE IF NOT EXISTS cluster_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cluster_id INTEGER NOT NULL,
            image_id INTEGER NOT NULL,
            probability REAL NOT NULL,
            outlier_score REAL NOT NULL,
            FOREIGN KEY (cluster_id) REFERENCES clusters (id) ON DELETE CASCADE,
            FOREIGN KEY (image_id) REFERENCES images (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "分类预测表",
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            image_id INTEGER NOT NULL,
            label_id INTEGER NOT NULL,
            probability REAL NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE,
            FOREIGN KEY (image_id) REFERENCES images (id) ON DELETE CASCADE,
            FOREIGN KEY (label_id) REFERENCES labels (id) ON DELETE CASCADE
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_jobs_result_status ON jobs(result_status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_dataset_id ON jobs(dataset_id)",
    "CREATE INDEX IF NOT EXISTS idx_dataset_jobs_active ON dataset_jobs(dataset_id, kind, status)",
    "CREATE INDEX IF NOT EXISTS idx_images_name ON images(dataset_id, name)",
    "CREATE INDEX IF NOT EXISTS idx_outliers_job_id ON outliers(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_similars_job_id ON similars(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_cluster_items_cluster_id ON cluster_items(cluster_id)",
    "CREATE INDEX IF NOT EXISTS idx_predictions_job_id ON predictions(job_id)",
];

/// 运行数据库迁移，可重复执行
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("运行SQLite数据库迁移");

    for (name, ddl) in TABLES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("创建{name}失败"))?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("创建索引失败: {ddl}"))?;
    }

    info!("✅ 数据库迁移完成");
    Ok(())
}
