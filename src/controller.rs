//! Run and stage lifecycle control.
//!
//! The controller owns the work directory: every state-mutating operation on
//! a run happens under that run's lock, across the whole
//! read–reconcile–decide–submit–persist sequence. Operations on distinct
//! runs proceed in parallel; no global lock is held across external-process
//! calls.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::results;
use crate::results::Deseq2Results;
use crate::results::FeatureCountsSummary;
use crate::results::QcReports;
use crate::results::ResultsError;
use crate::results::StageLogs;
use crate::scheduler::JobState;
use crate::scheduler::Scheduler;
use crate::scheduler::SchedulerError;
use crate::stage::Stage;
use crate::store::ADAPTER_TYPE_PARAM;
use crate::store::Run;
use crate::store::RunEntry;
use crate::store::RunStore;
use crate::store::StageState;
use crate::store::StageStatus;
use crate::store::StoreError;
use crate::template::TemplateEngine;
use crate::template::TemplateError;
use crate::validate;
use crate::validate::SampleReport;
use crate::validate::StageValidation;

/// Per-run diagnostic log, relative to the run directory.
const ORCHESTRATOR_LOG: &str = "logs/orchestrator.log";

/// Errors raised while submitting a stage.
#[derive(Debug, Error)]
pub enum SubmitStageError {
    /// A state store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A dependency of the stage has not completed.
    #[error("dependency `{missing}` not completed for stage `{stage}`")]
    Dependency {
        /// The stage being submitted.
        stage: Stage,
        /// The dependency that is not completed.
        missing: Stage,
    },
    /// Preflight validation failed.
    #[error("validation failed for stage `{stage}`")]
    Validation {
        /// The stage being submitted.
        stage: Stage,
        /// The validation outcome carrying errors and warnings.
        validation: StageValidation,
    },
    /// The stage already completed and the rerun was not confirmed.
    #[error("stage `{0}` has already completed; set `confirm_rerun` to run it again")]
    RerunRequired(Stage),
    /// Pre-rerun cleanup could not remove every artifact.
    #[error("cleanup for stage `{stage}` is incomplete: {message}")]
    Cleanup {
        /// The stage being cleaned.
        stage: Stage,
        /// What could not be removed.
        message: String,
    },
    /// Script generation failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// The scheduler rejected the submission.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Errors raised while updating a run's adapter type.
#[derive(Debug, Error)]
pub enum UpdateAdapterError {
    /// A state store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The trim stage is currently running.
    #[error("the trim stage is running; the adapter type cannot change")]
    TrimRunning,
}

/// The run/stage controller.
///
/// Constructed once at startup against a resolved [`Config`] and a scheduler
/// gateway; tests instantiate it against a temporary work directory and a
/// mock scheduler.
#[derive(Debug)]
pub struct Controller {
    /// The resolved runtime configuration.
    config: Arc<Config>,
    /// The on-disk state store.
    store: RunStore,
    /// The batch script renderer.
    templates: TemplateEngine,
    /// The scheduler gateway.
    scheduler: Arc<dyn Scheduler>,
    /// Per-run locks serializing state-mutating operations.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Controller {
    /// Create a controller over the given configuration and scheduler.
    pub fn new(config: Arc<Config>, scheduler: Arc<dyn Scheduler>) -> Self {
        let store = RunStore::new(config.runs_dir());
        let templates = TemplateEngine::new(&config);

        Self {
            config,
            store,
            templates,
            scheduler,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The resolved runtime configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The lock guarding a run's state.
    async fn run_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The run directory for an existing run.
    fn existing_run_dir(&self, id: Uuid) -> Result<PathBuf, StoreError> {
        if !self.store.exists(id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(self.store.run_dir(id))
    }

    /// Create a run: directory skeleton, initial state, every stage pending.
    pub async fn create_run(
        &self,
        name: String,
        description: String,
        account: String,
        adapter_type: Option<String>,
    ) -> Result<Run, StoreError> {
        let mut parameters = IndexMap::new();
        parameters.insert(
            ADAPTER_TYPE_PARAM.to_string(),
            adapter_type.unwrap_or_else(|| crate::store::DEFAULT_ADAPTER.to_string()),
        );

        let run = Run::new(name, description, account, parameters);
        self.store.create(&run)?;

        info!("created run `{}` ({})", run.name, run.run_id);
        Ok(run)
    }

    /// List all runs, reconciling each readable run first.
    ///
    /// Directories with unreadable state are surfaced as failed entries.
    pub async fn list_runs(&self) -> Result<Vec<RunEntry>, StoreError> {
        let entries = self.store.list()?;

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                RunEntry::Run(mut run) => {
                    let lock = self.run_lock(run.run_id).await;
                    let _guard = lock.lock().await;
                    self.reconcile_and_save(&mut run).await?;
                    out.push(RunEntry::Run(run));
                }
                broken @ RunEntry::Broken(_) => out.push(broken),
            }
        }

        Ok(out)
    }

    /// Get a run, reconciled against disk and scheduler state.
    pub async fn get_run(&self, id: Uuid) -> Result<Run, StoreError> {
        let lock = self.run_lock(id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(id)?;
        self.reconcile_and_save(&mut run).await?;
        Ok(run)
    }

    /// Delete a run: best-effort cancel of running jobs, then remove the
    /// directory tree. Idempotent; returns whether the run existed.
    pub async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        let lock = self.run_lock(id).await;
        let _guard = lock.lock().await;

        if let Ok(run) = self.store.load(id) {
            for (stage, state) in &run.stages {
                if state.status != StageStatus::Running {
                    continue;
                }
                if let Some(job_id) = &state.job_id {
                    if let Err(e) = self.scheduler.cancel(job_id).await {
                        warn!("failed to cancel job `{job_id}` for stage `{stage}`: {e}");
                    }
                }
            }
        }

        let existed = self.store.delete(id)?;
        self.locks.lock().await.remove(&id);

        if existed {
            info!("deleted run {id}");
        }
        Ok(existed)
    }

    /// Run a stage's preflight validation.
    pub async fn validate_stage(
        &self,
        id: Uuid,
        stage: Stage,
    ) -> Result<StageValidation, StoreError> {
        let lock = self.run_lock(id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(id)?;
        self.reconcile_and_save(&mut run).await?;

        Ok(validate::validate(
            &run,
            stage,
            &self.store.run_dir(id),
            &self.config.shared_reference_dir(),
        ))
    }

    /// Submit a stage: reconcile, enforce dependencies, validate, guard
    /// reruns, clean up on a confirmed rerun, render the script, submit it,
    /// and persist the new state.
    ///
    /// On any error, no state is mutated.
    pub async fn submit_stage(
        &self,
        id: Uuid,
        stage: Stage,
        account: Option<String>,
        confirm_rerun: bool,
    ) -> Result<StageState, SubmitStageError> {
        let lock = self.run_lock(id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(id)?;
        self.reconcile_and_save(&mut run).await?;

        for dep in stage.dependencies() {
            let completed = run
                .stages
                .get(dep)
                .is_some_and(|s| s.status == StageStatus::Completed);
            if !completed {
                return Err(SubmitStageError::Dependency {
                    stage,
                    missing: *dep,
                });
            }
        }

        let run_dir = self.store.run_dir(id);
        let validation = validate::validate(
            &run,
            stage,
            &run_dir,
            &self.config.shared_reference_dir(),
        );
        if !validation.valid {
            return Err(SubmitStageError::Validation { stage, validation });
        }

        if stage.done_flag(&run_dir).exists() {
            if !confirm_rerun {
                return Err(SubmitStageError::RerunRequired(stage));
            }
            self.cleanup_stage(&run_dir, stage)?;
        }

        if let Some(account) = account {
            if !account.is_empty() {
                run.account = account;
            }
        }

        let script = self.templates.generate(stage, &run)?;
        let job_id = self.scheduler.submit(&script).await?;

        let now = Utc::now();
        let state = StageState {
            status: StageStatus::Running,
            job_id: Some(job_id),
            updated_at: now,
        };
        run.stages.insert(stage, state.clone());
        run.status = run.derived_status();
        run.updated_at = now;
        self.store.save(&run)?;

        info!(
            "submitted stage `{stage}` of run {id} as job `{}`",
            state.job_id.as_deref().unwrap_or_default()
        );
        Ok(state)
    }

    /// Get a stage's reconciled state.
    pub async fn stage_status(&self, id: Uuid, stage: Stage) -> Result<StageState, StoreError> {
        let lock = self.run_lock(id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(id)?;
        self.reconcile_and_save(&mut run).await?;

        // All canonical stages are present by construction.
        Ok(run.stages[&stage].clone())
    }

    /// Cancel a running stage's job, best-effort.
    ///
    /// The stage status is left for the next reconciliation to settle.
    pub async fn cancel_stage(&self, id: Uuid, stage: Stage) -> Result<(), StoreError> {
        let lock = self.run_lock(id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(id)?;
        self.reconcile_and_save(&mut run).await?;

        let state = &run.stages[&stage];
        if state.status == StageStatus::Running {
            if let Some(job_id) = &state.job_id {
                if let Err(e) = self.scheduler.cancel(job_id).await {
                    warn!("failed to cancel job `{job_id}` for stage `{stage}`: {e}");
                }
            }
        }

        Ok(())
    }

    /// Change a run's adapter type; refused while trim is running.
    pub async fn update_adapter(
        &self,
        id: Uuid,
        adapter_type: String,
    ) -> Result<Run, UpdateAdapterError> {
        let lock = self.run_lock(id).await;
        let _guard = lock.lock().await;

        let mut run = self.store.load(id)?;
        self.reconcile_and_save(&mut run).await?;

        if run.stages[&Stage::Trim].status == StageStatus::Running {
            return Err(UpdateAdapterError::TrimRunning);
        }

        run.parameters
            .insert(ADAPTER_TYPE_PARAM.to_string(), adapter_type);
        run.updated_at = Utc::now();
        self.store.save(&run)?;

        Ok(run)
    }

    /// The charge accounts available to the calling user.
    pub async fn accounts(&self) -> Vec<String> {
        self.scheduler.accounts().await
    }

    /// Fail with `NotFound` unless the run exists.
    pub fn ensure_exists(&self, id: Uuid) -> Result<(), StoreError> {
        self.existing_run_dir(id).map(|_| ())
    }

    /// The FASTQ pairing report for a run's uploaded reads.
    pub fn sample_report(&self, id: Uuid) -> Result<SampleReport, StoreError> {
        let run_dir = self.existing_run_dir(id)?;
        Ok(validate::sample_report(&run_dir.join("raw")))
    }

    /// The upload destination directory for a run, created on demand.
    pub fn upload_dir(&self, id: Uuid, subdir: &str) -> Result<PathBuf, StoreError> {
        let run_dir = self.existing_run_dir(id)?;
        let dir = run_dir.join(subdir);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// The per-sample featureCounts assignment summary.
    pub fn featurecounts_summary(&self, id: Uuid) -> Result<FeatureCountsSummary, ResultsError> {
        let run_dir = self.existing_run_dir(id)?;
        results::featurecounts_summary(&run_dir)
    }

    /// The DESeq2 results overview.
    pub fn deseq2_results(&self, id: Uuid) -> Result<Deseq2Results, ResultsError> {
        let run_dir = self.existing_run_dir(id)?;
        results::deseq2_results(&run_dir)
    }

    /// The path and download name of a DESeq2 artifact.
    pub fn deseq2_download(
        &self,
        id: Uuid,
        file_type: &str,
    ) -> Result<(PathBuf, &'static str), ResultsError> {
        let run_dir = self.existing_run_dir(id)?;
        results::deseq2_download(&run_dir, file_type)
    }

    /// A stage's captured stdout and stderr.
    pub fn stage_logs(&self, id: Uuid, stage: Stage) -> Result<StageLogs, ResultsError> {
        let run_dir = self.existing_run_dir(id)?;
        Ok(results::stage_logs(&run_dir, stage))
    }

    /// The QC reports available for a run.
    pub fn qc_reports(&self, id: Uuid) -> Result<QcReports, ResultsError> {
        let run_dir = self.existing_run_dir(id)?;
        Ok(results::qc_reports(&run_dir))
    }

    /// Resolve a QC report file for serving.
    pub fn qc_file(
        &self,
        id: Uuid,
        stage: Stage,
        path: &str,
    ) -> Result<(PathBuf, &'static str), ResultsError> {
        let run_dir = self.existing_run_dir(id)?;
        results::qc_file(&run_dir, stage, path)
    }

    /// Apply the reconciliation procedure to `run` in place.
    ///
    /// Done flags are authoritative for completion; a job the scheduler
    /// reports COMPLETED without a done flag is a failure. An unknown
    /// scheduler state, or a scheduler query failure, keeps the stored
    /// status.
    async fn reconcile(&self, run: &mut Run) -> bool {
        let run_dir = self.store.run_dir(run.run_id);
        let mut changed = false;

        for (stage, state) in run.stages.iter_mut() {
            let next = if stage.done_flag(&run_dir).exists() {
                Some(StageStatus::Completed)
            } else if let Some(job_id) = state.job_id.clone() {
                match self.scheduler.status(&job_id).await {
                    Ok(JobState::Pending) | Ok(JobState::Running) => Some(StageStatus::Running),
                    Ok(JobState::Completed) => Some(StageStatus::Failed),
                    Ok(JobState::Failed) => Some(StageStatus::Failed),
                    Ok(JobState::Cancelled) => Some(StageStatus::Cancelled),
                    Ok(JobState::Unknown) => None,
                    Err(e) => {
                        warn!(
                            "status query for job `{job_id}` (stage `{stage}`) failed: {e}; \
                             keeping previous status"
                        );
                        None
                    }
                }
            } else {
                None
            };

            if let Some(next) = next {
                if next != state.status {
                    state.status = next;
                    state.updated_at = Utc::now();
                    changed = true;
                }
            }
        }

        let derived = run.derived_status();
        if derived != run.status {
            run.status = derived;
            run.updated_at = Utc::now();
            changed = true;
        }

        changed
    }

    /// Reconcile and persist when anything changed.
    async fn reconcile_and_save(&self, run: &mut Run) -> Result<(), StoreError> {
        if self.reconcile(run).await {
            self.store.save(run)?;
        }
        Ok(())
    }

    /// Remove a stage's primary outputs and done flag ahead of a confirmed
    /// rerun.
    ///
    /// Only plain files directly inside the registered subdirectories are
    /// removed, so `logs/` subdirectories and `star/genome_index/` survive.
    /// Any failure is recorded in the run's diagnostic log and aborts the
    /// submission; the next confirmed rerun re-attempts the cleanup.
    fn cleanup_stage(&self, run_dir: &Path, stage: Stage) -> Result<(), SubmitStageError> {
        let mut failures = Vec::new();

        for (subdir, pattern) in stage.cleanup_globs() {
            let dir = run_dir.join(subdir);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    failures.push(format!("could not read `{}`: {e}", dir.display()));
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if matches_glob(pattern, &name) {
                    if let Err(e) = fs::remove_file(&path) {
                        failures.push(format!("could not remove `{}`: {e}", path.display()));
                    }
                }
            }
        }

        let flag = stage.done_flag(run_dir);
        if flag.exists() {
            if let Err(e) = fs::remove_file(&flag) {
                failures.push(format!("could not remove `{}`: {e}", flag.display()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let message = failures.join("; ");
            self.append_run_log(
                run_dir,
                &format!("cleanup for `{stage}` incomplete: {message}"),
            );
            Err(SubmitStageError::Cleanup { stage, message })
        }
    }

    /// Append a line to the run's diagnostic log.
    fn append_run_log(&self, run_dir: &Path, message: &str) {
        let path = run_dir.join(ORCHESTRATOR_LOG);
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "{} {message}", Utc::now().to_rfc3339()));

        if let Err(e) = result {
            warn!("could not write run log `{}`: {e}", path.display());
        }
    }
}

/// Match an exact file name or a `*`-prefixed suffix pattern.
fn matches_glob(pattern: &str, name: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == pattern,
    }
}
