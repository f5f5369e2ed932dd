//! Shared test server plumbing.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use expressdiff::config::Config;
use expressdiff::config::StorageType;
use expressdiff::config::TEMPLATES_DIR;
use expressdiff::controller::Controller;
use expressdiff::scheduler::JobState;
use expressdiff::scheduler::Scheduler;
use expressdiff::scheduler::SchedulerError;
use expressdiff::server::api::AppState;
use expressdiff::server::create_router;
use expressdiff::stage::Stage;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

/// A scheduler double recording submissions and serving canned statuses.
#[derive(Debug, Default)]
pub struct MockScheduler {
    /// Canned job states by job id.
    statuses: Mutex<HashMap<String, JobState>>,
    /// Monotonic job id source.
    next_id: AtomicU64,
    /// When set, `submit` fails.
    pub fail_submit: AtomicBool,
    /// Job ids passed to `cancel`.
    pub cancelled: Mutex<Vec<String>>,
}

impl MockScheduler {
    /// Set the canned state for a job.
    pub fn set_status(&self, job_id: &str, state: JobState) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), state);
    }
}

#[async_trait]
impl Scheduler for MockScheduler {
    async fn submit(&self, _script: &Path) -> Result<String, SchedulerError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(SchedulerError::CommandFailed {
                command: String::from("sbatch"),
                stderr: String::from("submission rejected"),
            });
        }
        let id = 12340 + self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(id.to_string())
    }

    async fn status(&self, job_id: &str) -> Result<JobState, SchedulerError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(JobState::Running))
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn accounts(&self) -> Vec<String> {
        vec![String::from("acct-A"), String::from("acct-B")]
    }
}

/// A test server over a temporary install and work directory.
pub struct TestServer {
    /// The application router.
    pub app: Router,
    /// The scheduler double behind the router.
    pub scheduler: Arc<MockScheduler>,
    /// The resolved work directory.
    pub work_dir: PathBuf,
    /// Keeps the temporary directory alive for the test's duration.
    _temp: TempDir,
}

impl TestServer {
    /// The run directory for a run id.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.work_dir.join("runs").join(run_id)
    }
}

/// Create a test server with real filesystem state and a mock scheduler.
pub fn create_test_server() -> TestServer {
    let temp = TempDir::new().unwrap();
    let install = temp.path().join("install");
    let work = temp.path().join("work");

    let templates = install.join(TEMPLATES_DIR);
    std::fs::create_dir_all(&templates).unwrap();
    for stage in Stage::ALL {
        std::fs::write(
            templates.join(stage.template_file()),
            format!(
                "#!/bin/bash\n\
                 # {stage} batch script\n\
                 cd {{RUN_DIR}}\n\
                 echo {{RUN_ID}} {{ACCOUNT}} {{ADAPTER_TYPE}} {{BASE_DIR}}\n"
            ),
        )
        .unwrap();
    }

    let config = Config {
        install_dir: install,
        work_dir: work.clone(),
        storage_type: StorageType::Custom,
        host: String::from("127.0.0.1"),
        port: 0,
        scheduler_timeout: std::time::Duration::from_secs(5),
    };
    config.ensure_layout().unwrap();

    let scheduler = Arc::new(MockScheduler::default());
    let controller = Arc::new(Controller::new(Arc::new(config), scheduler.clone()));
    let app = create_router(AppState { controller });

    TestServer {
        app,
        scheduler,
        work_dir: work,
        _temp: temp,
    }
}

/// Issue a request with an optional JSON body; returns status and JSON body.
pub async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Create a run through the API and return its id.
pub async fn create_run(server: &TestServer, name: &str) -> String {
    let (status, body) = request(
        &server.app,
        "POST",
        "/runs",
        Some(serde_json::json!({"name": name, "account": "acct-A"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let run_id = body["run_id"].as_str().unwrap().to_string();
    run_id.parse::<Uuid>().unwrap();
    run_id
}

/// Place a paired FASTQ upload directly into a run's `raw/` directory.
pub fn seed_raw_reads(server: &TestServer, run_id: &str) {
    let raw = server.run_dir(run_id).join("raw");
    std::fs::write(raw.join("a_1.fq.gz"), b"").unwrap();
    std::fs::write(raw.join("a_2.fq.gz"), b"").unwrap();
}
