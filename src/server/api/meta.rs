//! Service metadata endpoints.

use axum::Json;
use axum::extract::State;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;
use crate::stage::Stage;

/// The health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: String,
    /// Current server time.
    pub timestamp: DateTime<Utc>,
    /// Crate version.
    pub version: String,
}

/// The storage information response.
#[derive(Debug, Serialize, ToSchema)]
pub struct StorageInfoResponse {
    /// The read-only install directory.
    pub install_directory: String,
    /// The writable work directory.
    pub data_directory: String,
    /// The directory holding all runs.
    pub runs_directory: String,
    /// Which source won the work directory resolution.
    pub storage_type: String,
    /// The user the server runs as.
    pub user: String,
}

/// The pipeline stages response.
#[derive(Debug, Serialize, ToSchema)]
pub struct StagesResponse {
    /// Stage names in canonical order.
    pub stages: Vec<String>,
}

/// Health check.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    ),
    tag = "meta"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: String::from("ok"),
        timestamp: Utc::now(),
        version: String::from(env!("CARGO_PKG_VERSION")),
    })
}

/// List the charge accounts available to the server's user.
#[utoipa::path(
    get,
    path = "/accounts",
    responses(
        (status = 200, description = "Available charge accounts", body = Vec<String>),
    ),
    tag = "meta"
)]
pub async fn accounts(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.controller.accounts().await)
}

/// Describe the resolved storage layout.
#[utoipa::path(
    get,
    path = "/storage-info",
    responses(
        (status = 200, description = "Resolved storage layout", body = StorageInfoResponse),
    ),
    tag = "meta"
)]
pub async fn storage_info(State(state): State<AppState>) -> Json<StorageInfoResponse> {
    let config = state.controller.config();

    Json(StorageInfoResponse {
        install_directory: config.install_dir.display().to_string(),
        data_directory: config.work_dir.display().to_string(),
        runs_directory: config.runs_dir().display().to_string(),
        storage_type: config.storage_type.to_string(),
        user: whoami::username().unwrap_or_default(),
    })
}

/// List the pipeline stages in canonical order.
#[utoipa::path(
    get,
    path = "/stages",
    responses(
        (status = 200, description = "Pipeline stages in canonical order", body = StagesResponse),
    ),
    tag = "meta"
)]
pub async fn stages() -> Json<StagesResponse> {
    Json(StagesResponse {
        stages: Stage::ALL.iter().map(|s| s.name().to_string()).collect(),
    })
}
