//! Service metadata endpoint tests.

use axum::http::StatusCode;

use crate::common::create_test_server;
use crate::common::request;

#[tokio::test]
async fn health_reports_status_and_version() {
    let server = create_test_server();

    let (status, body) = request(&server.app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn stages_are_listed_in_canonical_order() {
    let server = create_test_server();

    let (status, body) = request(&server.app, "GET", "/stages", None).await;

    assert_eq!(status, StatusCode::OK);
    let stages: Vec<&str> = body["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert_eq!(
        stages,
        ["qc_raw", "trim", "qc_trimmed", "star", "featurecounts", "deseq2"]
    );
}

#[tokio::test]
async fn accounts_come_from_the_scheduler() {
    let server = create_test_server();

    let (status, body) = request(&server.app, "GET", "/accounts", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!(["acct-A", "acct-B"]));
}

#[tokio::test]
async fn storage_info_reports_the_resolved_layout() {
    let server = create_test_server();

    let (status, body) = request(&server.app, "GET", "/storage-info", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data_directory"].as_str().unwrap(),
        server.work_dir.display().to_string()
    );
    assert!(
        body["runs_directory"]
            .as_str()
            .unwrap()
            .ends_with("runs")
    );
    assert_eq!(body["storage_type"], "custom");
    assert!(body["user"].is_string());
    assert!(body["install_directory"].is_string());
}
