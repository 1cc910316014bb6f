use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::convert::{ConvertError, JobSnapshot, StartedJob};
use crate::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("unknown job id")]
    NotFound,
    #[error("listing failed: {0}")]
    ListFailed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match &self {
            ApiError::Convert(ConvertError::MissingPath) => {
                (StatusCode::BAD_REQUEST, "missing_path", None)
            }
            ApiError::Convert(ConvertError::InvalidPath) => {
                (StatusCode::BAD_REQUEST, "invalid_path", None)
            }
            ApiError::Convert(ConvertError::Failed(detail)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "convert_failed",
                Some(detail.clone()),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not_found", None),
            ApiError::ListFailed(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "list_failed",
                Some(detail.clone()),
            ),
        };
        let mut body = json!({ "error": code });
        if let Some(detail) = detail {
            body["detail"] = json!(detail);
        }
        (status, Json(body)).into_response()
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

#[derive(Debug, Serialize)]
struct VideoItem {
    id: String,
    label: String,
    path: String,
}

/// Converted videos: every folder under the videos root that already has
/// a playlist. Folders still being encoded show up once the encoder has
/// written its first playlist revision.
pub async fn list_videos(State(app): State<AppState>) -> Json<serde_json::Value> {
    let mut items = Vec::new();
    if let Ok(mut dir) = tokio::fs::read_dir(&app.config.videos_dir).await {
        while let Ok(Some(entry)) = dir.next_entry().await {
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            if !entry.path().join("playlist.m3u8").exists() {
                continue;
            }
            items.push(VideoItem {
                path: format!("/videos/{}/playlist.m3u8", urlencoding::encode(&id)),
                label: id.clone(),
                id,
            });
        }
    }
    items.sort_by(|a, b| a.label.cmp(&b.label));
    Json(json!({ "items": items }))
}

#[derive(Debug, Deserialize)]
pub struct SubtitleQuery {
    folder: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubtitleItem {
    label: String,
    lang: String,
    path: String,
}

/// WebVTT sidecar files inside one video folder.
pub async fn list_subtitles(
    State(app): State<AppState>,
    Query(query): Query<SubtitleQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let folder = match query.folder.filter(|folder| !folder.is_empty()) {
        Some(folder) => folder,
        None => return Ok(Json(json!({ "items": [] }))),
    };
    // The folder name is a single path component, never a path.
    if folder.contains(['/', '\\']) || folder == ".." {
        return Ok(Json(json!({ "items": [] })));
    }

    let dir = app.config.videos_dir.join(&folder);
    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| ApiError::ListFailed(e.to_string()))?;
    let mut items = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(label) = name.strip_suffix(".vtt") else {
            continue;
        };
        items.push(SubtitleItem {
            label: label.to_string(),
            lang: "en".to_string(),
            path: format!(
                "/videos/{}/{}",
                urlencoding::encode(&folder),
                urlencoding::encode(&name)
            ),
        });
    }
    items.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(Json(json!({ "items": items })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    label: String,
    path: String,
    size_mb: u64,
    mtime: u64,
}

const RAW_EXTENSIONS: [&str; 4] = ["mkv", "mp4", "mov", "avi"];

/// Raw files eligible for conversion, with enough metadata to pick one.
pub async fn list_unconverted(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let raw_dir = &app.config.raw_dir;
    let mut entries = tokio::fs::read_dir(raw_dir)
        .await
        .map_err(|e| ApiError::ListFailed(e.to_string()))?;
    let mut items = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !RAW_EXTENSIONS.contains(&extension.as_str()) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|dur| dur.as_millis() as u64)
            .unwrap_or(0);
        items.push(RawItem {
            label: entry.file_name().to_string_lossy().to_string(),
            path: path.to_string_lossy().to_string(),
            size_mb: meta.len() / 1_000_000,
            mtime,
        });
    }
    items.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(Json(json!({ "dir": raw_dir.to_string_lossy(), "items": items })))
}

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    path: Option<String>,
    name: Option<String>,
}

pub async fn start_convert(
    State(app): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> Result<Json<StartedJob>, ApiError> {
    let started = app
        .jobs
        .start(request.path.as_deref(), request.name.as_deref())?;
    Ok(Json(started))
}

pub async fn convert_status(
    State(app): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let snapshot = app.jobs.status(&id).await.ok_or(ApiError::NotFound)?;
    Ok(Json(snapshot))
}
