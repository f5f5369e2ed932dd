//! Run state model and the on-disk state store.
//!
//! Each run owns a directory under `<work_dir>/runs/<run_id>/`; the single
//! machine-read file inside it is `run_state.json`, replaced atomically on
//! every save. Everything else in the run directory is tool output.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::stage::Stage;

/// Name of the per-run state document.
pub const STATE_FILE: &str = "run_state.json";

/// Temporary sibling written before the atomic rename.
const STATE_FILE_TMP: &str = ".run_state.json.tmp";

/// Subdirectories created for every run; all stage I/O lives here.
pub const RUN_SUBDIRS: &[&str] = &[
    "raw",
    "reference",
    "metadata",
    "trimmed",
    "trimmed/logs",
    "qc_raw",
    "qc_trimmed",
    "star",
    "star/logs",
    "featurecounts",
    "featurecounts/logs",
    "counts",
    "deseq2",
    "logs",
];

/// Parameter key carrying the Trimmomatic adapter set.
pub const ADAPTER_TYPE_PARAM: &str = "adapter_type";

/// Adapter set used when a run does not specify one.
pub const DEFAULT_ADAPTER: &str = "NexteraPE-PE";

/// The status of a run, derived from its stage statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// No stage has run yet.
    Created,
    /// At least one stage is running.
    Running,
    /// Every stage completed.
    Completed,
    /// At least one stage failed.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Created => write!(f, "created"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not yet submitted.
    Pending,
    /// Submitted to the scheduler and not yet finished.
    Running,
    /// Finished and confirmed by the stage's done flag.
    Completed,
    /// The job failed, or finished without producing its done flag.
    Failed,
    /// The job was cancelled.
    Cancelled,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The state of a single stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StageState {
    /// Current status.
    pub status: StageStatus,
    /// Scheduler job id of the most recent submission.
    pub job_id: Option<String>,
    /// Timestamp of the last transition.
    pub updated_at: DateTime<Utc>,
}

impl StageState {
    /// A pending stage state stamped with the given time.
    fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: StageStatus::Pending,
            job_id: None,
            updated_at: now,
        }
    }
}

/// A run and the states of its stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Run {
    /// Unique identifier; also the run directory name.
    pub run_id: Uuid,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Charge account submissions are billed to.
    pub account: String,
    /// Run parameters; carries at least `adapter_type`.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: IndexMap<String, String>,
    /// Derived run status.
    pub status: RunStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last state change.
    pub updated_at: DateTime<Utc>,
    /// Stage states in canonical pipeline order.
    #[schema(value_type = Object)]
    pub stages: IndexMap<Stage, StageState>,
}

impl Run {
    /// Create a new run with a fresh id and every stage pending.
    pub fn new(
        name: String,
        description: String,
        account: String,
        parameters: IndexMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        let stages = Stage::ALL
            .into_iter()
            .map(|stage| (stage, StageState::pending(now)))
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            name,
            description,
            account,
            parameters,
            status: RunStatus::Created,
            created_at: now,
            updated_at: now,
            stages,
        }
    }

    /// The adapter set passed to the trim template.
    pub fn adapter_type(&self) -> &str {
        self.parameters
            .get(ADAPTER_TYPE_PARAM)
            .map(String::as_str)
            .unwrap_or(DEFAULT_ADAPTER)
    }

    /// Derive the run status from the stage statuses.
    pub fn derived_status(&self) -> RunStatus {
        let statuses: Vec<StageStatus> = self.stages.values().map(|s| s.status).collect();

        if statuses.iter().any(|s| *s == StageStatus::Failed) {
            RunStatus::Failed
        } else if statuses.iter().all(|s| *s == StageStatus::Completed) {
            RunStatus::Completed
        } else if statuses.iter().any(|s| *s == StageStatus::Running) {
            RunStatus::Running
        } else {
            RunStatus::Created
        }
    }
}

/// A run directory whose state document is missing or unreadable.
///
/// Such directories are surfaced in listings rather than hidden.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BrokenRun {
    /// The run directory name.
    pub run_id: String,
    /// Always [`RunStatus::Failed`].
    pub status: RunStatus,
    /// What went wrong reading the state document.
    pub diagnostic: String,
}

/// One entry of a run listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum RunEntry {
    /// A run with a readable state document.
    Run(Run),
    /// A run directory with a missing or corrupt state document.
    Broken(BrokenRun),
}

/// Errors raised by the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The run does not exist.
    #[error("run `{0}` was not found")]
    NotFound(Uuid),
    /// A run with this id already exists.
    #[error("run `{0}` already exists")]
    Conflict(Uuid),
    /// The state document did not parse.
    #[error("state document `{path}` is corrupt: {source}")]
    Corrupt {
        /// The state document path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// An I/O error touching the run directory.
    #[error("i/o error at `{path}`: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Wraps an I/O error with the path it occurred at.
fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The on-disk state store rooted at `<work_dir>/runs/`.
#[derive(Debug, Clone)]
pub struct RunStore {
    /// The directory containing all run directories.
    runs_dir: PathBuf,
}

impl RunStore {
    /// Create a store rooted at the given runs directory.
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    /// The directory containing all run directories.
    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// The directory of a specific run.
    pub fn run_dir(&self, id: Uuid) -> PathBuf {
        self.runs_dir.join(id.to_string())
    }

    /// Whether a run with the given id exists.
    pub fn exists(&self, id: Uuid) -> bool {
        self.run_dir(id).join(STATE_FILE).is_file()
    }

    /// Atomically create the run directory skeleton and initial state.
    ///
    /// Fails with [`StoreError::Conflict`] if the directory already exists.
    pub fn create(&self, run: &Run) -> Result<(), StoreError> {
        let run_dir = self.run_dir(run.run_id);

        match fs::create_dir(&run_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Conflict(run.run_id));
            }
            Err(source) => return Err(io_err(&run_dir)(source)),
        }

        for subdir in RUN_SUBDIRS {
            let dir = run_dir.join(subdir);
            fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }

        self.save(run)
    }

    /// Load a run's state document.
    pub fn load(&self, id: Uuid) -> Result<Run, StoreError> {
        let path = self.run_dir(id).join(STATE_FILE);

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id));
            }
            Err(source) => return Err(io_err(&path)(source)),
        };

        serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt { path, source })
    }

    /// Persist a run's state document with an atomic replace.
    ///
    /// The document is written to a temporary sibling, synced, and renamed
    /// over the target so readers never observe a partial write.
    pub fn save(&self, run: &Run) -> Result<(), StoreError> {
        let run_dir = self.run_dir(run.run_id);
        let tmp = run_dir.join(STATE_FILE_TMP);
        let target = run_dir.join(STATE_FILE);

        let mut contents = serde_json::to_vec_pretty(run).map_err(|source| StoreError::Corrupt {
            path: target.clone(),
            source,
        })?;
        contents.push(b'\n');

        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(&contents).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        drop(file);

        fs::rename(&tmp, &target).map_err(io_err(&target))
    }

    /// List all run directories, sorted by directory name.
    ///
    /// Directories without a readable state document are reported as
    /// [`RunEntry::Broken`] with a diagnostic, not hidden.
    pub fn list(&self) -> Result<Vec<RunEntry>, StoreError> {
        let mut names = Vec::new();

        let entries = match fs::read_dir(&self.runs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_err(&self.runs_dir)(source)),
        };

        for entry in entries {
            let entry = entry.map_err(io_err(&self.runs_dir))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        let mut runs = Vec::with_capacity(names.len());
        for name in names {
            let id = match name.parse::<Uuid>() {
                Ok(id) => id,
                Err(_) => {
                    runs.push(RunEntry::Broken(BrokenRun {
                        run_id: name.clone(),
                        status: RunStatus::Failed,
                        diagnostic: format!("directory name `{name}` is not a valid run id"),
                    }));
                    continue;
                }
            };

            match self.load(id) {
                Ok(run) => runs.push(RunEntry::Run(run)),
                Err(e) => runs.push(RunEntry::Broken(BrokenRun {
                    run_id: name,
                    status: RunStatus::Failed,
                    diagnostic: e.to_string(),
                })),
            }
        }

        Ok(runs)
    }

    /// Remove a run directory tree.
    ///
    /// Idempotent; returns whether the directory existed.
    pub fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let run_dir = self.run_dir(id);

        match fs::remove_dir_all(&run_dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(io_err(&run_dir)(source)),
        }
    }
}
