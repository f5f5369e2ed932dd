//! Result and report endpoints.

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use uuid::Uuid;

use super::AppState;
use super::error::Error;
use crate::results::Deseq2Results;
use crate::results::FeatureCountsSummary;
use crate::results::QcReports;

/// The per-sample featureCounts assignment summary.
#[utoipa::path(
    get,
    path = "/runs/{run_id}/featurecounts-summary",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Assignment summary", body = FeatureCountsSummary),
        (status = 404, description = "Run or summary not found"),
    ),
    tag = "results"
)]
pub async fn featurecounts_summary(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<FeatureCountsSummary>, Error> {
    Ok(Json(state.controller.featurecounts_summary(run_id)?))
}

/// The DESeq2 results overview.
#[utoipa::path(
    get,
    path = "/runs/{run_id}/deseq2-results",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "DESeq2 results", body = Deseq2Results),
        (status = 404, description = "Run or results not found"),
    ),
    tag = "results"
)]
pub async fn deseq2_results(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Deseq2Results>, Error> {
    Ok(Json(state.controller.deseq2_results(run_id)?))
}

/// Download a DESeq2 artifact.
#[utoipa::path(
    get,
    path = "/runs/{run_id}/deseq2-download/{file_type}",
    params(
        ("run_id" = Uuid, Path, description = "Run id"),
        ("file_type" = String, Path, description = "One of summary, significant_degs, full_results, top_degs, counts_matrix"),
    ),
    responses(
        (status = 200, description = "File contents", body = String),
        (status = 400, description = "Unknown file type"),
        (status = 404, description = "Run or file not found"),
    ),
    tag = "results"
)]
pub async fn deseq2_download(
    State(state): State<AppState>,
    Path((run_id, file_type)): Path<(Uuid, String)>,
) -> Result<Response, Error> {
    let (path, name) = state.controller.deseq2_download(run_id, &file_type)?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| Error::Internal(format!("could not read `{}`: {e}", path.display())))?;

    let content_type = if name.ends_with(".csv") {
        "text/csv; charset=utf-8"
    } else {
        "text/plain; charset=utf-8"
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// List the QC reports available for a run.
#[utoipa::path(
    get,
    path = "/runs/{run_id}/qc/list",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Available QC reports", body = QcReports),
        (status = 404, description = "Run not found"),
    ),
    tag = "results"
)]
pub async fn qc_list(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<QcReports>, Error> {
    Ok(Json(state.controller.qc_reports(run_id)?))
}

/// Serve a QC report file.
#[utoipa::path(
    get,
    path = "/runs/{run_id}/qc/{stage}/{path}",
    params(
        ("run_id" = Uuid, Path, description = "Run id"),
        ("stage" = String, Path, description = "One of qc_raw, qc_trimmed"),
        ("path" = String, Path, description = "Report file path"),
    ),
    responses(
        (status = 200, description = "Report contents", body = String),
        (status = 400, description = "Invalid path"),
        (status = 404, description = "Run, stage, or file not found"),
    ),
    tag = "results"
)]
pub async fn qc_file(
    State(state): State<AppState>,
    Path((run_id, stage, rel)): Path<(Uuid, String, String)>,
) -> Result<Response, Error> {
    let stage = stage
        .parse::<crate::stage::Stage>()
        .map_err(|e| Error::NotFound(e.to_string()))?;

    let (path, content_type) = state.controller.qc_file(run_id, stage, &rel)?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| Error::Internal(format!("could not read `{}`: {e}", path.display())))?;

    Ok(([(header::CONTENT_TYPE, content_type.to_string())], bytes).into_response())
}
