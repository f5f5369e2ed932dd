//! Run management endpoints.

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::AppState;
use super::error::Error;
use crate::store::Run;
use crate::store::RunEntry;
use crate::validate::SampleReport;

/// Request to create a new run.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateRunRequest {
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Charge account submissions are billed to.
    pub account: String,
    /// Trimmomatic adapter set; defaults to `NexteraPE-PE`.
    #[serde(default)]
    pub adapter_type: Option<String>,
}

/// Request to change a run's adapter type.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateAdapterRequest {
    /// The new adapter set, passed through to the trim template.
    pub adapter_type: String,
}

/// A plain acknowledgement response.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    /// Human-readable outcome.
    pub message: String,
}

/// Create a run.
#[utoipa::path(
    post,
    path = "/runs",
    request_body = CreateRunRequest,
    responses(
        (status = 200, description = "Run created", body = Run),
        (status = 409, description = "Run id collision"),
    ),
    tag = "runs"
)]
pub async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<CreateRunRequest>,
) -> Result<Json<Run>, Error> {
    let run = state
        .controller
        .create_run(
            request.name,
            request.description,
            request.account,
            request.adapter_type,
        )
        .await?;

    Ok(Json(run))
}

/// List all runs.
#[utoipa::path(
    get,
    path = "/runs",
    responses(
        (status = 200, description = "All runs, reconciled", body = Vec<RunEntry>),
    ),
    tag = "runs"
)]
pub async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<RunEntry>>, Error> {
    Ok(Json(state.controller.list_runs().await?))
}

/// Get a run by id.
#[utoipa::path(
    get,
    path = "/runs/{run_id}",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run found", body = Run),
        (status = 404, description = "Run not found"),
    ),
    tag = "runs"
)]
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Run>, Error> {
    Ok(Json(state.controller.get_run(run_id).await?))
}

/// Delete a run.
///
/// Running jobs are cancelled best-effort first. Deleting a run that does
/// not exist succeeds, so the operation is idempotent.
#[utoipa::path(
    delete,
    path = "/runs/{run_id}",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run deleted (or already absent)", body = MessageResponse),
    ),
    tag = "runs"
)]
pub async fn delete_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, Error> {
    let existed = state.controller.delete_run(run_id).await?;

    let message = if existed {
        format!("run {run_id} deleted")
    } else {
        format!("run {run_id} was already absent")
    };
    Ok(Json(MessageResponse { message }))
}

/// Change a run's adapter type.
#[utoipa::path(
    put,
    path = "/runs/{run_id}/adapter",
    params(("run_id" = Uuid, Path, description = "Run id")),
    request_body = UpdateAdapterRequest,
    responses(
        (status = 200, description = "Adapter updated", body = Run),
        (status = 404, description = "Run not found"),
        (status = 409, description = "Trim stage is running"),
    ),
    tag = "runs"
)]
pub async fn update_adapter(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(request): Json<UpdateAdapterRequest>,
) -> Result<Json<Run>, Error> {
    let run = state
        .controller
        .update_adapter(run_id, request.adapter_type)
        .await?;

    Ok(Json(run))
}

/// Report the FASTQ pairing of a run's uploaded reads.
#[utoipa::path(
    get,
    path = "/runs/{run_id}/samples",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Sample pairing report", body = SampleReport),
        (status = 404, description = "Run not found"),
    ),
    tag = "runs"
)]
pub async fn samples(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<SampleReport>, Error> {
    Ok(Json(state.controller.sample_report(run_id)?))
}
