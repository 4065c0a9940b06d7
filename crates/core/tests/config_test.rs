use analysis_core::config::*;
use std::env;
use std::fs;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.database.max_connections, 10);
    assert!(config.watcher.enabled);
    assert!(config.worker.enabled);
    assert!(!config.observability.metrics_enabled);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "sqlite://test/pipeline_test.db"
max_connections = 15
min_connections = 2
connection_timeout_seconds = 30
idle_timeout_seconds = 600

[analysis_api]
base_url = "http://analysis.test:8000/api"
request_timeout_seconds = 20
download_timeout_seconds = 900
api_token = "secret"

[watcher]
enabled = false
poll_interval_seconds = 30

[worker]
enabled = true
max_concurrent_jobs = 8
ingest_batch_size = 200
progress_log_interval = 5000
stream_buffer_size = 32

[storage]
work_dir = "/var/lib/pipeline/work"
artifacts_dir = "/var/lib/pipeline/artifacts"

[observability]
metrics_enabled = true
metrics_bind_address = "127.0.0.1:9100"
log_level = "debug"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.database.url, "sqlite://test/pipeline_test.db");
    assert_eq!(config.database.max_connections, 15);
    assert_eq!(config.analysis_api.api_token.as_deref(), Some("secret"));
    assert!(!config.watcher.enabled);
    assert_eq!(config.worker.ingest_batch_size, 200);
    assert_eq!(
        config.storage.job_work_dir(7),
        std::path::PathBuf::from("/var/lib/pipeline/work/jobs/7")
    );
    assert_eq!(
        config.storage.job_artifacts_dir(3, 7),
        std::path::PathBuf::from("/var/lib/pipeline/artifacts/3/jobs/7")
    );
    assert_eq!(config.observability.log_level, "debug");
}

#[test]
fn test_config_validation_worker() {
    let mut config = AppConfig::default();
    config.worker.max_concurrent_jobs = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.worker.ingest_batch_size = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_database() {
    let mut config = AppConfig::default();
    config.database.min_connections = 20;
    assert!(config.validate().is_err());

    config.database.min_connections = 1;
    config.database.url = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_observability() {
    let mut config = AppConfig::default();
    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.metrics_enabled = true;
    config.observability.metrics_bind_address = "not-an-address".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_analysis_api() {
    let mut config = AppConfig::default();
    config.analysis_api.base_url = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_load_from_file() {
    let toml_content = r#"
[analysis_api]
base_url = "http://file-test:8000/api/"
request_timeout_seconds = 10
download_timeout_seconds = 100

[storage]
work_dir = "file-work"
artifacts_dir = "file-artifacts"
"#;

    let temp_file = NamedTempFile::new().unwrap();
    fs::write(temp_file.path(), toml_content).unwrap();

    let config = AppConfig::load(Some(temp_file.path().to_str().unwrap())).unwrap();

    assert_eq!(config.analysis_api.base_url, "http://file-test:8000/api/");
    assert_eq!(config.storage.work_dir, std::path::PathBuf::from("file-work"));
    assert_eq!(config.worker.max_concurrent_jobs, 4);
}

#[test]
fn test_config_environment_override() {
    let toml_content = "[storage]\nwork_dir = \"env-work\"\nartifacts_dir = \"env-artifacts\"\n";
    let temp_file = NamedTempFile::new().unwrap();
    fs::write(temp_file.path(), toml_content).unwrap();

    env::set_var("PIPELINE_WATCHER__POLL_INTERVAL_SECONDS", "42");
    let config = AppConfig::load(Some(temp_file.path().to_str().unwrap()));
    env::remove_var("PIPELINE_WATCHER__POLL_INTERVAL_SECONDS");

    let config = config.unwrap();
    assert_eq!(config.watcher.poll_interval_seconds, 42);
    assert_eq!(config.storage.work_dir, std::path::PathBuf::from("env-work"));
}

#[test]
fn test_invalid_toml_format() {
    let invalid_toml = r#"
[database
url = "invalid toml
"#;

    assert!(AppConfig::from_toml(invalid_toml).is_err());
}

#[test]
fn test_log_levels() {
    let mut config = AppConfig::default();

    for level in ["trace", "debug", "info", "warn", "error"] {
        config.observability.log_level = level.to_string();
        assert!(config.validate().is_ok(), "日志级别 {level} 应该有效");
    }
}
