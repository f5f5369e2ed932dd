//! Upload routing tests.

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::common::TestServer;
use crate::common::create_run;
use crate::common::create_test_server;

/// The multipart boundary used by these tests.
const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

/// Build a multipart body from `(file_name, contents)` pairs.
fn multipart_body(files: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, contents) in files {
        body.push_str(&format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             {contents}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

/// POST a multipart upload; returns status and JSON body.
async fn upload(server: &TestServer, run_id: &str, files: &[(&str, &str)]) -> (StatusCode, Value) {
    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/runs/{run_id}/upload"))
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(multipart_body(files)))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn uploads_are_routed_by_extension() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, body) = upload(
        &server,
        &run_id,
        &[
            ("a_1.fq.gz", "reads"),
            ("ref.fa", ">chr1"),
            ("meta.csv", "sample_name,condition"),
            ("bad.exe", "nope"),
        ],
    )
    .await;

    assert_eq!(status, StatusCode::OK);

    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("bad.exe"));

    let uploaded = body["uploaded"].as_array().unwrap();
    assert_eq!(uploaded.len(), 3);

    let run_dir = server.run_dir(&run_id);
    assert!(run_dir.join("raw/a_1.fq.gz").is_file());
    assert!(run_dir.join("reference/ref.fa").is_file());
    assert!(run_dir.join("metadata/meta.csv").is_file());
}

#[tokio::test]
async fn upload_creates_missing_destinations() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    // Simulate a partially provisioned run directory.
    std::fs::remove_dir_all(server.run_dir(&run_id).join("reference")).unwrap();

    let (status, _) = upload(&server, &run_id, &[("genome.fasta", ">chr1")]).await;

    assert_eq!(status, StatusCode::OK);
    assert!(
        server
            .run_dir(&run_id)
            .join("reference/genome.fasta")
            .is_file()
    );
}

#[tokio::test]
async fn fully_rejected_upload_is_a_400() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, body) = upload(&server, &run_id, &[("virus.exe", "nope")]).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body["errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn upload_to_an_unknown_run_is_a_404() {
    let server = create_test_server();

    let (status, body) = upload(
        &server,
        "00000000-0000-0000-0000-000000000000",
        &[("a_1.fq.gz", "reads")],
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFound");
}

#[tokio::test]
async fn client_paths_are_stripped_from_upload_names() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, body) = upload(&server, &run_id, &[("../../escape/meta.csv", "x")]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploaded"][0]["file"], "meta.csv");
    assert!(server.run_dir(&run_id).join("metadata/meta.csv").is_file());
}
