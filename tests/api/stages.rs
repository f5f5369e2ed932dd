//! Stage lifecycle endpoint tests.

use axum::http::StatusCode;
use expressdiff::scheduler::JobState;
use serde_json::json;

use crate::common::TestServer;
use crate::common::create_run;
use crate::common::create_test_server;
use crate::common::request;
use crate::common::seed_raw_reads;

/// Satisfy star's dependencies and validation inputs on disk.
fn seed_star_inputs(server: &TestServer, run_id: &str) {
    let run_dir = server.run_dir(run_id);
    std::fs::write(run_dir.join("qc_raw/qc_raw_done.flag"), b"").unwrap();
    std::fs::write(run_dir.join("trimmed/trimming_done.flag"), b"").unwrap();
    std::fs::write(run_dir.join("trimmed/a_forward_paired.fq.gz"), b"").unwrap();
    std::fs::write(run_dir.join("trimmed/a_reverse_paired.fq.gz"), b"").unwrap();
    std::fs::write(run_dir.join("reference/genome.fa"), b"").unwrap();
    std::fs::write(run_dir.join("reference/genes.gtf"), b"").unwrap();
}

#[tokio::test]
async fn dependency_gating_names_the_missing_stage() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    seed_raw_reads(&server, &run_id);

    let (status, body) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/trim"),
        Some(json!({"account": "acct-A"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "DependencyError");
    assert!(body["message"].as_str().unwrap().contains("qc_raw"));
}

#[tokio::test]
async fn rerun_guard_requires_confirmation() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    seed_raw_reads(&server, &run_id);

    let flag = server.run_dir(&run_id).join("qc_raw/qc_raw_done.flag");
    std::fs::write(&flag, b"").unwrap();

    // Unconfirmed rerun is refused.
    let (status, body) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/qc_raw"),
        Some(json!({"account": "acct-A"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "RerunRequired");
    assert!(body["message"].as_str().unwrap().contains("qc_raw"));
    assert!(body["message"].as_str().unwrap().contains("confirm_rerun"));

    // A confirmed rerun deletes the flag and submits.
    let (status, body) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/qc_raw"),
        Some(json!({"account": "acct-A", "confirm_rerun": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert!(!flag.exists());

    let job_id = body["job_id"].as_str().unwrap().to_string();

    // The reported job id matches the next reconciled state.
    let (status, body) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/stages/qc_raw/status"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn completed_job_without_flag_is_reported_failed() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    seed_star_inputs(&server, &run_id);

    let (status, body) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/star"),
        Some(json!({"account": "acct-A"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    server.scheduler.set_status(&job_id, JobState::Completed);

    let (status, body) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/stages/star/status"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
}

#[tokio::test]
async fn unknown_stage_is_a_404() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, body) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/stages/bowtie/status"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFound");
}

#[tokio::test]
async fn validation_endpoint_reports_missing_inputs() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, body) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/stages/qc_raw/validate"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert!(
        body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e.as_str().unwrap().contains("raw/"))
    );
}

#[tokio::test]
async fn submission_with_invalid_inputs_carries_the_error_list() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    let (status, body) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/qc_raw"),
        Some(json!({"account": "acct-A"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "ValidationError");
    assert!(!body["errors"].as_array().unwrap().is_empty());
    assert!(body["warnings"].is_array());
}

#[tokio::test]
async fn scheduler_failure_is_a_bad_gateway_and_mutates_nothing() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    seed_raw_reads(&server, &run_id);
    server
        .scheduler
        .fail_submit
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let (status, body) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/qc_raw"),
        Some(json!({"account": "acct-A"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "SchedulerError");

    let (_, body) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/stages/qc_raw/status"),
        None,
    )
    .await;
    assert_eq!(body["status"], "pending");
    assert!(body["job_id"].is_null());
}

#[tokio::test]
async fn cancel_requests_job_cancellation() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    seed_raw_reads(&server, &run_id);

    let (_, body) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/qc_raw"),
        Some(json!({"account": "acct-A"})),
    )
    .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, _) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/qc_raw/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        *server.scheduler.cancelled.lock().unwrap(),
        vec![job_id.clone()]
    );

    // The next reconciliation settles the status.
    server.scheduler.set_status(&job_id, JobState::Cancelled);
    let (_, body) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/stages/qc_raw/status"),
        None,
    )
    .await;
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn stage_logs_surface_job_output() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;

    std::fs::write(server.run_dir(&run_id).join("logs/trim.out"), "trimming\n").unwrap();

    let (status, body) = request(
        &server.app,
        "GET",
        &format!("/runs/{run_id}/stages/trim/logs"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stdout"], "trimming\n");
    assert_eq!(body["stderr"], "");
    assert_eq!(body["stdout_file"], "logs/trim.out");
    assert_eq!(body["stderr_file"], "logs/trim.err");
}

#[tokio::test]
async fn generated_script_substitutes_the_run() {
    let server = create_test_server();
    let run_id = create_run(&server, "r1").await;
    seed_raw_reads(&server, &run_id);
    std::fs::write(server.run_dir(&run_id).join("qc_raw/qc_raw_done.flag"), b"").unwrap();

    let (status, _) = request(
        &server.app,
        "POST",
        &format!("/runs/{run_id}/stages/trim"),
        Some(json!({"account": "acct-B"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let script = server
        .work_dir
        .join("generated_slurm")
        .join(format!("trim_{run_id}.script"));
    let contents = std::fs::read_to_string(script).unwrap();

    assert!(contents.contains(&run_id));
    assert!(contents.contains("acct-B"));
    assert!(contents.contains("NexteraPE-PE"));
    assert!(contents.contains(&server.work_dir.display().to_string()));
    assert!(!contents.contains('{'));
}
