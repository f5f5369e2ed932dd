//! Server setup and routing.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::api;
use super::api::AppState;
use crate::config::Config;
use crate::controller::Controller;
use crate::scheduler::Scheduler;

/// Upload body limit; sequencing data runs to gigabytes.
const UPLOAD_BODY_LIMIT: usize = 8 * 1024 * 1024 * 1024;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        api::meta::health,
        api::meta::accounts,
        api::meta::storage_info,
        api::meta::stages,
        api::runs::create_run,
        api::runs::list_runs,
        api::runs::get_run,
        api::runs::delete_run,
        api::runs::update_adapter,
        api::runs::samples,
        api::uploads::upload,
        api::stages::validate_stage,
        api::stages::submit_stage,
        api::stages::stage_status,
        api::stages::cancel_stage,
        api::stages::stage_logs,
        api::results::featurecounts_summary,
        api::results::deseq2_results,
        api::results::deseq2_download,
        api::results::qc_list,
        api::results::qc_file,
    ),
    components(schemas(
        api::meta::HealthResponse,
        api::meta::StorageInfoResponse,
        api::meta::StagesResponse,
        api::runs::CreateRunRequest,
        api::runs::UpdateAdapterRequest,
        api::runs::MessageResponse,
        api::uploads::UploadedFile,
        api::uploads::UploadResponse,
        api::stages::SubmitStageRequest,
        api::stages::StageStatusResponse,
        crate::stage::Stage,
        crate::store::Run,
        crate::store::RunEntry,
        crate::store::BrokenRun,
        crate::store::RunStatus,
        crate::store::StageState,
        crate::store::StageStatus,
        crate::validate::StageValidation,
        crate::validate::SamplePair,
        crate::validate::SampleReport,
        crate::results::FeatureCountsSummary,
        crate::results::SampleCounts,
        crate::results::Deseq2Results,
        crate::results::DegTable,
        crate::results::QcReports,
        crate::results::StageLogs,
    )),
    tags(
        (name = "meta", description = "Service metadata endpoints"),
        (name = "runs", description = "Run management endpoints"),
        (name = "uploads", description = "Input artifact uploads"),
        (name = "stages", description = "Stage lifecycle endpoints"),
        (name = "results", description = "Result and report endpoints")
    )
)]
struct ApiDoc;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::meta::health))
        .route("/accounts", get(api::meta::accounts))
        .route("/storage-info", get(api::meta::storage_info))
        .route("/stages", get(api::meta::stages))
        .route(
            "/runs",
            post(api::runs::create_run).get(api::runs::list_runs),
        )
        .route(
            "/runs/{run_id}",
            get(api::runs::get_run).delete(api::runs::delete_run),
        )
        .route("/runs/{run_id}/adapter", put(api::runs::update_adapter))
        .route("/runs/{run_id}/upload", post(api::uploads::upload))
        .route("/runs/{run_id}/samples", get(api::runs::samples))
        .route(
            "/runs/{run_id}/stages/{stage}",
            post(api::stages::submit_stage),
        )
        .route(
            "/runs/{run_id}/stages/{stage}/validate",
            get(api::stages::validate_stage),
        )
        .route(
            "/runs/{run_id}/stages/{stage}/status",
            get(api::stages::stage_status),
        )
        .route(
            "/runs/{run_id}/stages/{stage}/cancel",
            post(api::stages::cancel_stage),
        )
        .route(
            "/runs/{run_id}/stages/{stage}/logs",
            get(api::stages::stage_logs),
        )
        .route(
            "/runs/{run_id}/featurecounts-summary",
            get(api::results::featurecounts_summary),
        )
        .route(
            "/runs/{run_id}/deseq2-results",
            get(api::results::deseq2_results),
        )
        .route(
            "/runs/{run_id}/deseq2-download/{file_type}",
            get(api::results::deseq2_download),
        )
        .route("/runs/{run_id}/qc/list", get(api::results::qc_list))
        .route(
            "/runs/{run_id}/qc/{stage}/{*path}",
            get(api::results::qc_file),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the server.
///
/// # Errors
///
/// Returns an error if the work directory layout cannot be created or the
/// listener fails to bind.
pub async fn serve(config: Config, scheduler: Arc<dyn Scheduler>) -> anyhow::Result<()> {
    config.ensure_layout()?;

    tracing::info!("install directory: `{}`", config.install_dir.display());
    tracing::info!("work directory: `{}`", config.work_dir.display());

    let addr = format!("{}:{}", config.host, config.port);
    let controller = Arc::new(Controller::new(Arc::new(config), scheduler));
    let state = AppState { controller };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("server listening on `{}`", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
