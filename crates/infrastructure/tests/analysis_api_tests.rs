use analysis_core::{AnalysisApiConfig, PipelineError};
use analysis_domain::{AnalysisService, DataInputs, SubmitJobRequest};
use analysis_infrastructure::AnalysisApiClient;
use axum::body::Bytes;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

async fn spawn_server() -> String {
    let router = Router::new()
        .route(
            "/api/app/{app}/describe",
            get(|Path(app): Path<String>| async move {
                Json(json!({"app": app, "parameters": {"n_neighbors": "int"}}))
            }),
        )
        .route(
            "/api/job",
            post(|Json(body): Json<Value>| async move {
                if body["app"] == "broken" {
                    return (StatusCode::UNPROCESSABLE_ENTITY, "unknown app".to_string());
                }
                let echoed = body["data_inputs"]["data"].clone();
                (
                    StatusCode::OK,
                    json!({"job_id": 4711, "state": "PENDING", "echo": echoed}).to_string(),
                )
            }),
        )
        .route(
            "/api/job/{id}/status",
            get(|Path(id): Path<String>| async move {
                if id == "gone" {
                    (StatusCode::NOT_FOUND, "no such job".to_string())
                } else {
                    (
                        StatusCode::OK,
                        json!({"state": "SUCCESS", "status": "exit 0"}).to_string(),
                    )
                }
            }),
        )
        .route(
            "/api/job/{id}/output",
            get(|| async { vec![7u8; 200_000] }),
        )
        .route(
            "/api/upload",
            post(|headers: HeaderMap, body: Bytes| async move {
                let content_type = headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if content_type.starts_with("multipart/form-data") && !body.is_empty() {
                    (StatusCode::OK, json!({"uuid": "probe-uuid"}).to_string())
                } else {
                    (StatusCode::BAD_REQUEST, "expected multipart".to_string())
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/api/")
}

fn client(base_url: String) -> AnalysisApiClient {
    AnalysisApiClient::new(&AnalysisApiConfig {
        base_url,
        request_timeout_seconds: 5,
        download_timeout_seconds: 30,
        api_token: None,
    })
    .unwrap()
}

#[tokio::test]
async fn test_describe_returns_remote_json() {
    let api = client(spawn_server().await);
    let described = api.describe("umap").await.unwrap();
    assert_eq!(described["app"], "umap");
}

#[tokio::test]
async fn test_submit_job_parses_numeric_id_and_keeps_raw_response() {
    let api = client(spawn_server().await);
    let request = SubmitJobRequest {
        app: "hdbscan".to_string(),
        data_inputs: DataInputs::files(vec!["a.png".into(), "b.png".into()], "png"),
        job_options: json!({"min_cluster_size": 5}),
    };

    let submitted = api.submit_job(&request).await.unwrap();
    assert_eq!(submitted.job_id, "4711");
    assert_eq!(submitted.state.as_deref(), Some("PENDING"));
    assert_eq!(submitted.raw["echo"], json!(["a.png", "b.png"]));
}

#[tokio::test]
async fn test_non_success_response_becomes_api_error() {
    let api = client(spawn_server().await);
    let request = SubmitJobRequest {
        app: "broken".to_string(),
        data_inputs: DataInputs::single("x", "png"),
        job_options: json!({}),
    };

    let err = api.submit_job(&request).await.unwrap_err();
    match err {
        PipelineError::Api { status, body } => {
            assert_eq!(status, 422);
            assert_eq!(body, "unknown app");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = api.get_job_status("gone").await.unwrap_err();
    assert!(matches!(err, PipelineError::Api { status: 404, .. }));
}

#[tokio::test]
async fn test_get_job_status() {
    let api = client(spawn_server().await);
    let status = api.get_job_status("4711").await.unwrap();
    assert!(status.is_terminal());
    assert!(status.is_success());
    assert_eq!(status.status.as_deref(), Some("exit 0"));
}

#[tokio::test]
async fn test_download_streams_to_file() {
    let api = client(spawn_server().await);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested").join("output.tar.gz");

    let written = api.download_job_output("4711", &dest).await.unwrap();
    assert_eq!(written, 200_000);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 200_000);
}

#[tokio::test]
async fn test_upload_sends_multipart() {
    let api = client(spawn_server().await);
    let dir = tempfile::tempdir().unwrap();
    let probe = dir.path().join("probe.png");
    std::fs::write(&probe, b"fake image").unwrap();

    let uploaded = api.upload_file(&probe).await.unwrap();
    assert_eq!(uploaded.uuid, "probe-uuid");
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let api = client("http://127.0.0.1:1/api/".to_string());
    let err = api.describe("umap").await.unwrap_err();
    assert!(matches!(err, PipelineError::Network(_)));
    assert!(err.is_external());
}
