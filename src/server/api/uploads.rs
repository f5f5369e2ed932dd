//! Artifact upload endpoint.
//!
//! Uploaded files are routed into run subdirectories by extension and
//! streamed to disk; anything with an unrecognized extension is collected
//! into a per-file error instead of failing the whole request.

use axum::Json;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::State;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use utoipa::ToSchema;
use uuid::Uuid;

use super::AppState;
use super::error::Error;

/// A successfully stored upload.
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadedFile {
    /// The uploaded file name.
    pub file: String,
    /// The run subdirectory it was routed into.
    pub destination: String,
}

/// The upload outcome.
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    /// Files stored, in upload order.
    pub uploaded: Vec<UploadedFile>,
    /// Per-file errors for rejected uploads.
    pub errors: Vec<String>,
}

/// Route an upload to its run subdirectory by extension.
fn destination(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_ascii_lowercase();

    if lower.ends_with(".fq.gz") || lower.ends_with(".fastq.gz") {
        Some("raw")
    } else if lower.ends_with(".fa") || lower.ends_with(".fasta") || lower.ends_with(".gtf") {
        Some("reference")
    } else if lower.ends_with(".csv") || lower.ends_with(".tsv") {
        Some("metadata")
    } else {
        None
    }
}

/// Strip any client-supplied path components from an upload name.
fn sanitize_name(file_name: &str) -> Option<&str> {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}

/// Upload input artifacts into a run.
#[utoipa::path(
    post,
    path = "/runs/{run_id}/upload",
    params(("run_id" = Uuid, Path, description = "Run id")),
    request_body(content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Upload outcome", body = UploadResponse),
        (status = 400, description = "No file was accepted"),
        (status = 404, description = "Run not found"),
    ),
    tag = "uploads"
)]
pub async fn upload(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, Error> {
    state.controller.ensure_exists(run_id)?;

    let mut uploaded = Vec::new();
    let mut errors = Vec::new();
    let mut saw_field = false;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(format!("malformed multipart body: {e}")))?
    {
        saw_field = true;

        let Some(file_name) = field.file_name().map(str::to_string) else {
            errors.push(String::from("a form field is missing its file name"));
            continue;
        };

        let Some(name) = sanitize_name(&file_name) else {
            errors.push(format!("invalid file name `{file_name}`"));
            continue;
        };

        let Some(subdir) = destination(name) else {
            errors.push(format!("unsupported file type: `{name}`"));
            continue;
        };

        // Creates the destination on demand; also the run existence check.
        let dir = state.controller.upload_dir(run_id, subdir)?;
        let path = dir.join(name);

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| Error::Internal(format!("could not create `{}`: {e}", path.display())))?;

        loop {
            let chunk = field
                .chunk()
                .await
                .map_err(|e| Error::BadRequest(format!("upload of `{name}` aborted: {e}")))?;
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await.map_err(|e| {
                Error::Internal(format!("could not write `{}`: {e}", path.display()))
            })?;
        }

        file.flush()
            .await
            .map_err(|e| Error::Internal(format!("could not write `{}`: {e}", path.display())))?;

        uploaded.push(UploadedFile {
            file: name.to_string(),
            destination: subdir.to_string(),
        });
    }

    if !saw_field {
        return Err(Error::BadRequest(String::from("no files were provided")));
    }

    // All-rejected uploads are a client error; partial success is reported
    // with per-file errors.
    if uploaded.is_empty() && !errors.is_empty() {
        return Err(Error::Validation {
            message: String::from("no file was accepted"),
            errors,
            warnings: Vec::new(),
        });
    }

    Ok(Json(UploadResponse { uploaded, errors }))
}
