//! Download dashboard REST endpoints

use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::db::DownloadRecord;
use crate::services::{DownloadError, FinalizeStatus, ReconciledDownload};

#[derive(Debug, Deserialize)]
pub struct SubmitDownloadRequest {
    pub media_type: String,
    pub url: String,
    pub target_location: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitDownloadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn error_status(err: &DownloadError) -> StatusCode {
    match err {
        DownloadError::NotTracked(_) => StatusCode::NOT_FOUND,
        DownloadError::AlreadyTracked(_) => StatusCode::CONFLICT,
        DownloadError::InvalidMediaType(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DownloadError::TaskNotFound(_) => StatusCode::CONFLICT,
        DownloadError::QueueFull | DownloadError::WorkerStopped => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DownloadError::Remote(_) => StatusCode::BAD_GATEWAY,
        DownloadError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// List tracked downloads with live remote status where available
async fn list_downloads(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReconciledDownload>>, (StatusCode, Json<ActionResponse>)> {
    match state.downloads.list_reconciled().await {
        Ok(listed) => Ok(Json(listed)),
        Err(e) => Err((
            error_status(&e),
            Json(ActionResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        )),
    }
}

/// Track a new download and start it on the remote client
async fn submit_download(
    State(state): State<AppState>,
    Json(body): Json<SubmitDownloadRequest>,
) -> (StatusCode, Json<SubmitDownloadResponse>) {
    match state
        .downloads
        .submit(&body.media_type, &body.url, &body.target_location)
        .await
    {
        Ok(record) => (
            StatusCode::CREATED,
            Json(SubmitDownloadResponse {
                success: true,
                download: Some(record),
                error: None,
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(SubmitDownloadResponse {
                success: false,
                download: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// Accept a completion action; the move itself runs in the background
async fn complete_download(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> (StatusCode, Json<ActionResponse>) {
    match state.downloads.complete(&identifier).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(ActionResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(ActionResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// Snapshot of background move outcomes, keyed by identifier
async fn finalize_jobs(State(state): State<AppState>) -> Json<HashMap<String, FinalizeStatus>> {
    Json(state.downloads.finalize_statuses())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/downloads", get(list_downloads).post(submit_download))
        .route("/downloads/{identifier}/complete", post(complete_download))
        .route("/finalize-jobs", get(finalize_jobs))
}
