//! The scheduler gateway.
//!
//! The controller talks to the batch system only through the [`Scheduler`]
//! trait; production wires in [`slurm::SlurmScheduler`] and tests substitute
//! a mock.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub mod slurm;

pub use slurm::SlurmScheduler;

/// Canonical job states produced by the gateway.
///
/// Whatever the scheduler's native vocabulary, it is mapped onto these;
/// anything ambiguous becomes [`JobState::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Queued, waiting for resources.
    Pending,
    /// Executing.
    Running,
    /// Finished with a zero exit status.
    Completed,
    /// Finished unsuccessfully (including timeouts and node failures).
    Failed,
    /// Cancelled by the user or an administrator.
    Cancelled,
    /// The scheduler could not resolve the job.
    Unknown,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Errors raised by scheduler command invocations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The command could not be spawned.
    #[error("failed to invoke `{command}`: {message}")]
    Command {
        /// The command name.
        command: String,
        /// The spawn failure.
        message: String,
    },
    /// The command exited with a failure status.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed {
        /// The command name.
        command: String,
        /// The command's standard error.
        stderr: String,
    },
    /// The command did not finish within the configured timeout.
    #[error("`{command}` timed out after {seconds}s")]
    Timeout {
        /// The command name.
        command: String,
        /// The timeout that elapsed.
        seconds: u64,
    },
    /// Submission output did not contain a job id.
    #[error("could not parse a job id from sbatch output: `{0}`")]
    ParseJobId(String),
}

/// The narrow interface through which the controller talks to the external
/// batch system.
#[async_trait]
pub trait Scheduler: Send + Sync + std::fmt::Debug {
    /// Submit a generated batch script; returns the scheduler job id.
    async fn submit(&self, script: &Path) -> Result<String, SchedulerError>;

    /// Query the state of a job.
    ///
    /// The live queue is consulted first, then the historical accounting
    /// source; a job absent from both is [`JobState::Unknown`].
    async fn status(&self, job_id: &str) -> Result<JobState, SchedulerError>;

    /// Cancel a job.
    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError>;

    /// The charge accounts available to the calling user.
    ///
    /// Falls back to a deterministic default list when the site command is
    /// absent or fails; never errors.
    async fn accounts(&self) -> Vec<String>;
}
