use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use rust_drive_backend::config::StorageConfig;
use rust_drive_backend::infrastructure::database;
use rust_drive_backend::services::quota::QuotaLedger;
use rust_drive_backend::services::session::SessionStore;
use rust_drive_backend::services::upload_service::UploadService;
use rust_drive_backend::{AppState, create_app};
use sea_orm::{ConnectOptions, Database};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

const BOUNDARY: &str = "test-boundary";

async fn test_state(tmp: &tempfile::TempDir) -> AppState {
    // A single pooled connection keeps every query on the same in-memory
    // database.
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1);
    let db = Database::connect(opt).await.unwrap();
    database::run_migrations(&db).await.unwrap();

    let mut config = StorageConfig::default();
    config.data_root = tmp.path().to_path_buf();

    let quota = Arc::new(QuotaLedger::new(
        db.clone(),
        config.default_quota_bytes,
        Duration::from_secs(60),
    ));
    let sessions = Arc::new(SessionStore::new(
        config.temp_root(),
        Duration::from_secs(config.session_ttl_secs),
    ));
    let upload = Arc::new(UploadService::new(
        db.clone(),
        quota,
        sessions,
        config.max_chunk_size,
        Arc::new(Notify::new()),
    ));

    AppState { db, upload, config }
}

fn text_part(name: &str, value: &str) -> String {
    format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
    )
}

fn multipart_body(fields: &[(&str, &str)], chunk: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(text_part(name, value).as_bytes());
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(chunk);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn health_check_responds() {
    let tmp = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&tmp).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn single_chunk_upload_over_http_finishes() {
    let tmp = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&tmp).await);

    let body = multipart_body(
        &[
            ("file_name", "hello.bin"),
            ("parent_id", "0"),
            ("content_hash", "deadbeef"),
            ("chunk_index", "0"),
            ("chunk_total", "1"),
        ],
        b"hello over http",
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header("x-user-id", "u1")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["phase"], "finished");
    assert!(!json["file_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn upload_without_identity_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&tmp).await);

    let body = multipart_body(
        &[
            ("file_name", "hello.bin"),
            ("content_hash", "deadbeef"),
            ("chunk_index", "0"),
            ("chunk_total", "1"),
        ],
        b"data",
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
