pub mod analysis_api;
pub mod app_config;
pub mod database;
pub mod storage_observability;
pub mod watcher_worker;

// Re-export main types for easier imports
pub use analysis_api::AnalysisApiConfig;
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use storage_observability::{ObservabilityConfig, StorageConfig};
pub use watcher_worker::{WatcherConfig, WorkerConfig};
