//! Stage lifecycle endpoints.

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::AppState;
use super::error::Error;
use crate::results::StageLogs;
use crate::stage::Stage;
use crate::store::StageState;
use crate::store::StageStatus;
use crate::validate::StageValidation;

/// Request to submit a stage.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubmitStageRequest {
    /// Charge account for this submission; defaults to the run's account.
    #[serde(default)]
    pub account: Option<String>,
    /// Confirms rerunning a stage that has already completed.
    #[serde(default)]
    pub confirm_rerun: bool,
}

/// A stage's status.
#[derive(Debug, Serialize, ToSchema)]
pub struct StageStatusResponse {
    /// The stage.
    pub stage: Stage,
    /// Current status.
    pub status: StageStatus,
    /// Scheduler job id of the most recent submission.
    pub job_id: Option<String>,
    /// Timestamp of the last transition.
    pub updated_at: DateTime<Utc>,
}

impl StageStatusResponse {
    /// Build the response from a stage and its state.
    fn new(stage: Stage, state: StageState) -> Self {
        Self {
            stage,
            status: state.status,
            job_id: state.job_id,
            updated_at: state.updated_at,
        }
    }
}

/// Parse a stage path segment; unknown names are `404`s.
fn parse_stage(raw: &str) -> Result<Stage, Error> {
    raw.parse::<Stage>()
        .map_err(|e| Error::NotFound(e.to_string()))
}

/// Run a stage's preflight validation.
#[utoipa::path(
    get,
    path = "/runs/{run_id}/stages/{stage}/validate",
    params(
        ("run_id" = Uuid, Path, description = "Run id"),
        ("stage" = String, Path, description = "Stage name"),
    ),
    responses(
        (status = 200, description = "Validation outcome", body = StageValidation),
        (status = 404, description = "Run or stage not found"),
    ),
    tag = "stages"
)]
pub async fn validate_stage(
    State(state): State<AppState>,
    Path((run_id, stage)): Path<(Uuid, String)>,
) -> Result<Json<StageValidation>, Error> {
    let stage = parse_stage(&stage)?;
    Ok(Json(state.controller.validate_stage(run_id, stage).await?))
}

/// Submit a stage to the scheduler.
#[utoipa::path(
    post,
    path = "/runs/{run_id}/stages/{stage}",
    params(
        ("run_id" = Uuid, Path, description = "Run id"),
        ("stage" = String, Path, description = "Stage name"),
    ),
    request_body = SubmitStageRequest,
    responses(
        (status = 200, description = "Stage submitted", body = StageStatusResponse),
        (status = 400, description = "Validation or dependency failure"),
        (status = 404, description = "Run or stage not found"),
        (status = 409, description = "Rerun requires confirmation"),
        (status = 502, description = "Scheduler failure"),
    ),
    tag = "stages"
)]
pub async fn submit_stage(
    State(state): State<AppState>,
    Path((run_id, stage)): Path<(Uuid, String)>,
    Json(request): Json<SubmitStageRequest>,
) -> Result<Json<StageStatusResponse>, Error> {
    let stage = parse_stage(&stage)?;

    let stage_state = state
        .controller
        .submit_stage(run_id, stage, request.account, request.confirm_rerun)
        .await?;

    Ok(Json(StageStatusResponse::new(stage, stage_state)))
}

/// Get a stage's reconciled status.
#[utoipa::path(
    get,
    path = "/runs/{run_id}/stages/{stage}/status",
    params(
        ("run_id" = Uuid, Path, description = "Run id"),
        ("stage" = String, Path, description = "Stage name"),
    ),
    responses(
        (status = 200, description = "Stage status", body = StageStatusResponse),
        (status = 404, description = "Run or stage not found"),
    ),
    tag = "stages"
)]
pub async fn stage_status(
    State(state): State<AppState>,
    Path((run_id, stage)): Path<(Uuid, String)>,
) -> Result<Json<StageStatusResponse>, Error> {
    let stage = parse_stage(&stage)?;
    let stage_state = state.controller.stage_status(run_id, stage).await?;
    Ok(Json(StageStatusResponse::new(stage, stage_state)))
}

/// Cancel a running stage's job, best-effort.
#[utoipa::path(
    post,
    path = "/runs/{run_id}/stages/{stage}/cancel",
    params(
        ("run_id" = Uuid, Path, description = "Run id"),
        ("stage" = String, Path, description = "Stage name"),
    ),
    responses(
        (status = 200, description = "Cancellation requested", body = super::runs::MessageResponse),
        (status = 404, description = "Run or stage not found"),
    ),
    tag = "stages"
)]
pub async fn cancel_stage(
    State(state): State<AppState>,
    Path((run_id, stage)): Path<(Uuid, String)>,
) -> Result<Json<super::runs::MessageResponse>, Error> {
    let stage = parse_stage(&stage)?;
    state.controller.cancel_stage(run_id, stage).await?;

    Ok(Json(super::runs::MessageResponse {
        message: format!("cancellation requested for stage `{stage}`"),
    }))
}

/// Read a stage's captured stdout and stderr.
#[utoipa::path(
    get,
    path = "/runs/{run_id}/stages/{stage}/logs",
    params(
        ("run_id" = Uuid, Path, description = "Run id"),
        ("stage" = String, Path, description = "Stage name"),
    ),
    responses(
        (status = 200, description = "Stage logs", body = StageLogs),
        (status = 404, description = "Run or stage not found"),
    ),
    tag = "stages"
)]
pub async fn stage_logs(
    State(state): State<AppState>,
    Path((run_id, stage)): Path<(Uuid, String)>,
) -> Result<Json<StageLogs>, Error> {
    let stage = parse_stage(&stage)?;
    Ok(Json(state.controller.stage_logs(run_id, stage)?))
}
