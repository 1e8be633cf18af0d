use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, Request, State};
use axum::http::{header, HeaderValue};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use fit_summary_api::api::{summary_file_name, DownloadQuery, UploadResponse, UPLOAD_FIELD};
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

use crate::error::AppError;
use crate::files::{checked_name, resolve, NameLocks};
use crate::process::Processor;

/// Shared by all handlers.
#[derive(Debug)]
pub struct AppState {
    pub uploads_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub static_dir: PathBuf,
    pub processor: Processor,
    pub max_upload_size: usize,
    pub locks: Arc<NameLocks>,
}

pub fn routes(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.static_dir);
    let max_upload_size = state.max_upload_size;
    Router::new()
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/download", get(download))
        .route("/health", get(|| async { "OK" }))
        .fallback_service(static_files)
        .with_state(Arc::new(state))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let id = fastrand::u64(..);
    log::info!(id; "received upload");

    let mut multipart = multipart.map_err(|e| AppError::Form(e.body_text()))?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::from_multipart(&e, state.max_upload_size))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            return process_upload(&state, id, field).await.map(Json);
        }
    }
    Err(AppError::MissingFile)
}

/// Saves the file part, runs the processor on it and checks for its output.
async fn process_upload(
    state: &AppState,
    id: u64,
    field: Field<'_>,
) -> Result<UploadResponse, AppError> {
    let name = checked_name(field.file_name().unwrap_or_default())?.to_owned();
    log::debug!(id, name:display = name; "file part found");

    // Uploads sharing a stem share the summary, so that is what gets locked.
    let summary_name = summary_file_name(&name);
    let summary_path = state.processed_dir.join(&summary_name);
    let _guard = state.locks.lock(&summary_name).await;

    let upload_path = state.uploads_dir.join(&name);
    let size = save(field, &upload_path, state.max_upload_size).await?;
    log::debug!(id, size; "saved to {upload_path:?}");

    // A summary left from an earlier run must not count as this run's output.
    match tokio::fs::remove_file(&summary_path).await {
        Ok(()) => log::debug!(id; "removed previous {summary_path:?}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(AppError::Output(e)),
    }

    let output = state
        .processor
        .run(id, &upload_path, &state.processed_dir)
        .await?;
    log::debug!(id; "processor finished: {}", output.trim());

    if !tokio::fs::try_exists(&summary_path)
        .await
        .map_err(AppError::Output)?
    {
        log::warn!(id; "processor succeeded but {summary_path:?} is missing");
        return Err(AppError::OutputMissing);
    }

    log::info!(id, summary:display = summary_name; "processed upload");
    Ok(UploadResponse::processed(&summary_name))
}

/// Streams a multipart field into `path`, returns the bytes written.
///
/// A partial file is removed again if the body breaks off.
async fn save(mut field: Field<'_>, path: &Path, limit: usize) -> Result<usize, AppError> {
    let mut file = tokio::fs::File::create(path).await.map_err(AppError::Save)?;
    let mut size = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                drop(file);
                if let Err(e) = tokio::fs::remove_file(path).await {
                    log::warn!(e:debug; "failed to remove partial upload {path:?}");
                }
                return Err(AppError::from_multipart(&e, limit));
            }
        };
        file.write_all(&chunk).await.map_err(AppError::Save)?;
        size += chunk.len();
    }
    file.flush().await.map_err(AppError::Save)?;
    Ok(size)
}

async fn download(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
    request: Request,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(|e| AppError::Query(e.body_text()))?;
    let name = query
        .file
        .filter(|file| !file.is_empty())
        .ok_or(AppError::MissingParameter)?;
    let path = resolve(&state.processed_dir, &name)?;
    log::debug!(name:display = name; "serving download");

    let mut response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    if response.status().is_success() {
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        // Names are free of control characters, but may still not be valid header text.
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename={name}")) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        } else {
            headers.insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment"),
            );
        }
    }
    Ok(response.map(Body::new))
}
