//! Run management endpoint tests.

use axum::http::StatusCode;
use serde_json::json;

use crate::common::create_run;
use crate::common::create_test_server;
use crate::common::request;
use crate::common::seed_raw_reads;

#[tokio::test]
async fn create_and_list_runs() {
    let server = create_test_server();

    let run_id = create_run(&server, "r1").await;

    // The state document exists on disk.
    assert!(server.run_dir(&run_id).join("run_state.json").is_file());

    let (status, body) = request(&server.app, "GET", "/runs", None).await;
    assert_eq!(status, StatusCode::OK);

    let runs = body.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["run_id"], run_id.as_str());
    assert_eq!(runs[0]["status"], "created");

    // Six pending stages in canonical order.
    let stages = runs[0]["stages"].as_object().unwrap();
    let names: Vec<&String> = stages.keys().collect();
    assert_eq!(
        names,
        ["qc_raw", "trim", "qc_trimmed", "star", "featurecounts", "deseq2"]
    );
    assert!(stages.values().all(|s| s["status"] == "pending"));
}

#[tokio::test]
async fn get_run_returns_the_run() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, body) = request(&server.app, "GET", &format!("/runs/{run_id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run_id"], run_id.as_str());
    assert_eq!(body["name"], "r1");
    assert_eq!(body["account"], "acct-A");
    assert_eq!(body["parameters"]["adapter_type"], "NexteraPE-PE");
}

#[tokio::test]
async fn unknown_run_is_a_404() {
    let server = create_test_server();

    let (status, body) = request(
        &server.app,
        "GET",
        "/runs/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFound");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, _) = request(&server.app, "DELETE", &format!("/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!server.run_dir(&run_id).exists());

    let (status, body) = request(&server.app, "DELETE", &format!("/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("absent"));
}

#[tokio::test]
async fn broken_run_directories_are_listed_as_failed() {
    let server = create_test_server();
    create_run(&server, "r1").await;

    std::fs::create_dir(server.work_dir.join("runs/not-a-run")).unwrap();

    let (status, body) = request(&server.app, "GET", "/runs", None).await;
    assert_eq!(status, StatusCode::OK);

    let runs = body.as_array().unwrap();
    assert_eq!(runs.len(), 2);

    let broken = runs
        .iter()
        .find(|r| r["run_id"] == "not-a-run")
        .expect("broken entry is listed");
    assert_eq!(broken["status"], "failed");
    assert!(broken["diagnostic"].is_string());
}

#[tokio::test]
async fn adapter_update_round_trips() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, body) = request(
        &server.app,
        "PUT",
        &format!("/runs/{run_id}/adapter"),
        Some(json!({"adapter_type": "TruSeq3-PE"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["parameters"]["adapter_type"], "TruSeq3-PE");
}

#[tokio::test]
async fn adapter_update_conflicts_while_trim_runs() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    seed_raw_reads(&server, &run_id);

    // Complete qc_raw and start trim.
    std::fs::write(server.run_dir(&run_id).join("qc_raw/qc_raw_done.flag"), b"").unwrap();
    let (status, _) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/trim"),
        Some(json!({"account": "acct-A"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &server.app,
        "PUT",
        &format!("/runs/{run_id}/adapter"),
        Some(json!({"adapter_type": "TruSeq3-PE"})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "Conflict");
}

#[tokio::test]
async fn samples_report_pairs_uploads() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    seed_raw_reads(&server, &run_id);

    let (status, body) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/samples"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_files"], 2);
    let samples = body["samples"].as_array().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0]["name"], "a");
    assert_eq!(samples[0]["complete"], true);
}
