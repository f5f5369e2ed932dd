//! Result and report endpoint tests.

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::common::create_run;
use crate::common::create_test_server;
use crate::common::request;

#[tokio::test]
async fn featurecounts_summary_is_404_until_present() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    let uri = format!("/runs/{run_id}/featurecounts-summary");

    let (status, _) = request(&server.app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::fs::write(
        server.run_dir(&run_id).join("featurecounts/counts.txt.summary"),
        "Status\tstar/liver.bam\nAssigned\t80\nUnassigned_NoFeatures\t20\n",
    )
    .unwrap();

    let (status, body) = request(&server.app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let samples = body["samples"].as_array().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0]["sample"], "liver");
    assert_eq!(samples[0]["assigned"], 80);
    assert_eq!(samples[0]["total"], 100);
    assert_eq!(samples[0]["assigned_pct"], 80.0);
}

#[tokio::test]
async fn deseq2_results_parse_summary_and_degs() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    let deseq2 = server.run_dir(&run_id).join("deseq2");

    let uri = format!("/runs/{run_id}/deseq2-results");
    let (status, _) = request(&server.app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::fs::write(
        deseq2.join("summary.txt"),
        "Total genes tested: 1200\nSignificant DEGs: 2\n",
    )
    .unwrap();
    std::fs::write(
        deseq2.join("significant_degs.csv"),
        "gene_id,log2FoldChange,padj\nENSG01,1.234567,0.00001\nENSG02,-2.5,0.04\n",
    )
    .unwrap();

    let (status, body) = request(&server.app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["Significant DEGs"], "2");
    assert_eq!(body["significant_degs"]["total"], 2);
    assert_eq!(body["significant_degs"]["rows"][0][1], "1.2346");
    assert_eq!(
        body["files"],
        serde_json::json!(["summary", "significant_degs"])
    );
}

#[tokio::test]
async fn deseq2_download_rejects_unknown_file_types() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, body) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/deseq2-download/everything"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "BadRequest");
}

#[tokio::test]
async fn deseq2_download_serves_the_file() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    std::fs::write(
        server.run_dir(&run_id).join("deseq2/significant_degs.csv"),
        "gene_id\nENSG01\n",
    )
    .unwrap();

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/runs/{run_id}/deseq2-download/significant_degs"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("significant_degs.csv"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"gene_id\nENSG01\n");
}

#[tokio::test]
async fn qc_reports_are_listed_and_served() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    std::fs::write(
        server.run_dir(&run_id).join("qc_raw/a_1_fastqc.html"),
        "<html>ok</html>",
    )
    .unwrap();

    let (status, body) = request(&server.app, "GET", &format!("/runs/{run_id}/qc/list"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["qc_raw"], serde_json::json!(["a_1_fastqc.html"]));
    assert_eq!(body["qc_trimmed"], serde_json::json!([]));

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/runs/{run_id}/qc/qc_raw/a_1_fastqc.html"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/html"));
}

#[tokio::test]
async fn qc_serving_rejects_traversal() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, _) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/qc/qc_raw/../run_state.json"),
        None,
    )
    .await;

    assert_ne!(status, StatusCode::OK);
}

#[tokio::test]
async fn qc_serving_is_limited_to_qc_stages() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    std::fs::write(server.run_dir(&run_id).join("star/a.html"), "x").unwrap();

    let (status, _) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/qc/star/a.html"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
