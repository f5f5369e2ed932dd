//! Slurm implementation of the scheduler gateway.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;
use tracing::warn;

use super::JobState;
use super::Scheduler;
use super::SchedulerError;

/// The account returned when account discovery is unavailable.
pub const DEFAULT_ACCOUNT: &str = "default";

/// Matches the job id in sbatch's submission banner.
static SBATCH_JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Submitted batch job (\d+)").expect("sbatch regex"));

/// Gateway over the cluster's Slurm command line tools.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    /// Timeout applied to each command invocation.
    timeout: Duration,
}

impl SlurmScheduler {
    /// Create a gateway with the given per-command timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a Slurm command under the configured timeout.
    async fn run_command(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<std::process::Output, SchedulerError> {
        debug!("invoking `{program}` with {args:?}");

        let future = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        match tokio::time::timeout(self.timeout, future).await {
            Err(_) => Err(SchedulerError::Timeout {
                command: program.to_string(),
                seconds: self.timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(SchedulerError::Command {
                command: program.to_string(),
                message: e.to_string(),
            }),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

#[async_trait]
impl Scheduler for SlurmScheduler {
    async fn submit(&self, script: &Path) -> Result<String, SchedulerError> {
        let script = script.display().to_string();
        let output = self.run_command("sbatch", &[script.as_str()]).await?;

        if !output.status.success() {
            return Err(SchedulerError::CommandFailed {
                command: String::from("sbatch"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_sbatch_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn status(&self, job_id: &str) -> Result<JobState, SchedulerError> {
        // The live queue knows pending and running jobs. A non-zero exit
        // (e.g. "Invalid job id specified" once the job has aged out) means
        // absent, not an error.
        let output = self
            .run_command("squeue", &["-h", "-j", job_id, "-o", "%T"])
            .await?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(raw) = first_line(&stdout) {
                return Ok(map_state(raw));
            }
        }

        // Fall back to accounting for finished jobs.
        let output = self
            .run_command("sacct", &["-n", "-P", "-j", job_id, "-o", "State"])
            .await?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(raw) = first_line(&stdout) {
                return Ok(map_state(raw));
            }
        }

        Ok(JobState::Unknown)
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        let output = self.run_command("scancel", &[job_id]).await?;

        if !output.status.success() {
            return Err(SchedulerError::CommandFailed {
                command: String::from("scancel"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    async fn accounts(&self) -> Vec<String> {
        if which::which("sacctmgr").is_err() {
            debug!("`sacctmgr` not found; using the fallback account list");
            return fallback_accounts();
        }

        let user = whoami::username().unwrap_or_default();
        let user_arg = format!("user={user}");
        let output = self
            .run_command(
                "sacctmgr",
                &["-n", "-P", "show", "assoc", user_arg.as_str(), "format=account"],
            )
            .await;

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!(
                    "account discovery failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return fallback_accounts();
            }
            Err(e) => {
                warn!("account discovery failed: {e}");
                return fallback_accounts();
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut accounts: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        accounts.sort();
        accounts.dedup();

        if accounts.is_empty() {
            fallback_accounts()
        } else {
            accounts
        }
    }
}

/// The deterministic account list used when discovery is unavailable.
fn fallback_accounts() -> Vec<String> {
    vec![String::from(DEFAULT_ACCOUNT)]
}

/// The first non-empty line of command output.
fn first_line(stdout: &str) -> Option<&str> {
    stdout.lines().map(str::trim).find(|line| !line.is_empty())
}

/// Parse the job id out of sbatch's submission banner.
fn parse_sbatch_output(stdout: &str) -> Result<String, SchedulerError> {
    SBATCH_JOB_ID
        .captures(stdout)
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| SchedulerError::ParseJobId(stdout.trim().to_string()))
}

/// Map Slurm's state vocabulary onto the canonical five states.
fn map_state(raw: &str) -> JobState {
    // sacct suffixes states with `+` for job steps and scancel annotates
    // cancellations with the requesting uid ("CANCELLED by 1234").
    let token = raw
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('+');

    match token {
        "PENDING" | "REQUEUED" | "SUSPENDED" => JobState::Pending,
        "RUNNING" | "COMPLETING" => JobState::Running,
        "COMPLETED" => JobState::Completed,
        "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "PREEMPTED" | "BOOT_FAIL"
        | "DEADLINE" => JobState::Failed,
        token if token.starts_with("CANCELLED") => JobState::Cancelled,
        _ => JobState::Unknown,
    }
}
