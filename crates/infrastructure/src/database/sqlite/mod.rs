pub mod sqlite_dataset_job_repository;
pub mod sqlite_dataset_repository;
pub mod sqlite_image_repository;
pub mod sqlite_job_repository;
pub mod sqlite_label_repository;
pub mod sqlite_result_repository;

pub use sqlite_dataset_job_repository::SqliteDatasetJobRepository;
pub use sqlite_dataset_repository::SqliteDatasetRepository;
pub use sqlite_image_repository::SqliteImageRepository;
pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_label_repository::SqliteLabelRepository;
pub use sqlite_result_repository::SqliteResultRepository;

pub type DbPool = sqlx::SqlitePool;
