//! Recording REST surface and the record-and-watch redirect.

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::{
    server::state::AppState,
    types::{redirect_found, RecordingStatus},
    Error, Result,
};

#[derive(Debug, Deserialize)]
pub struct StartRecordingBody {
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clearkey: Option<String>,
}

/// GET /api/recordings
pub async fn list(State(state): State<AppState>) -> Response {
    Json(state.recordings.list().await).into_response()
}

/// GET /api/recordings/active
pub async fn list_active(State(state): State<AppState>) -> Response {
    Json(state.recordings.list_active().await).into_response()
}

/// GET /api/recordings/{id}
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    Ok(Json(state.recordings.get(&id).await?).into_response())
}

/// POST /api/recordings/start
pub async fn start(
    State(state): State<AppState>,
    Json(body): Json<StartRecordingBody>,
) -> Result<Response> {
    if body.url.is_empty() {
        return Err(Error::MissingParameter("url"));
    }
    let name = if body.name.is_empty() {
        "recording"
    } else {
        &body.name
    };

    let recording = state
        .recordings
        .start(&body.url, name, body.clearkey.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(recording)).into_response())
}

/// POST /api/recordings/{id}/stop
pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    state
        .recordings
        .stop(&id)
        .await
        .map_err(|e| match e {
            Error::RecordingNotActive(id) => Error::NotFound(format!("recording not active: {id}")),
            other => other,
        })?;
    Ok(Json(json!({"status": "stopped"})).into_response())
}

/// GET /api/recordings/{id}/stream — serves the TS file with range support.
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response> {
    let recording = state.recordings.get(&id).await?;
    serve_ts_file(&recording.file_path, req).await
}

/// GET /api/recordings/{id}/download
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response> {
    let recording = state.recordings.get(&id).await?;
    let mut response = serve_ts_file(&recording.file_path, req).await?;
    if let Ok(value) = header::HeaderValue::from_str(&format!(
        "attachment; filename=\"{}.ts\"",
        recording.name
    )) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// DELETE /api/recordings/{id}
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    state.recordings.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// GET /api/recordings/{id}/delete — GET-based delete for players that
/// cannot issue DELETE.
pub async fn delete_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    state.recordings.delete(&id).await?;
    Ok(Json(json!({"success": true, "message": "Recording deleted"})).into_response())
}

/// DELETE /api/recordings/all — bulk delete of non-active recordings.
pub async fn delete_all(State(state): State<AppState>) -> Response {
    let mut deleted = 0;
    for recording in state.recordings.list().await {
        if recording.status != RecordingStatus::Recording
            && state.recordings.delete(&recording.id).await.is_ok()
        {
            deleted += 1;
        }
    }
    Json(json!({"success": true, "deleted": deleted})).into_response()
}

/// GET /record — start recording, then redirect to the live proxy URL so
/// the stream can be watched while it records.
pub async fn record(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let url = query
        .get("url")
        .cloned()
        .ok_or(Error::MissingParameter("url"))?;
    let name = query
        .get("name")
        .cloned()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "recording".to_string());
    let clearkey = query.get("clearkey").cloned().filter(|k| !k.is_empty());

    state
        .recordings
        .start(&url, &name, clearkey.as_deref())
        .await?;

    let mut live = url::Url::parse(&format!("{}/proxy/manifest.m3u8", state.config.base_url))
        .map_err(|e| Error::Internal(e.to_string()))?;
    {
        let mut pairs = live.query_pairs_mut();
        pairs.append_pair("url", &url);
        if let Some(clearkey) = &clearkey {
            pairs.append_pair("clearkey", clearkey);
        }
        let mut forwarded: Vec<_> = query.iter().filter(|(k, _)| k.starts_with("h_")).collect();
        forwarded.sort();
        for (key, value) in forwarded {
            pairs.append_pair(key, value);
        }
    }

    Ok(redirect_found(live.as_str()))
}

/// GET /record/stop/{id} — stop and redirect to the recording's stream.
pub async fn stop_and_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if let Err(err) = state.recordings.stop(&id).await {
        // The recording may already be stopped; redirect regardless.
        tracing::debug!(%id, %err, "stop recording result");
    }

    let stream_url = format!("{}/api/recordings/{}/stream", state.config.base_url, id);
    redirect_found(&stream_url)
}

/// ServeFile handles range requests; `.ts` resolves to video/MP2T.
async fn serve_ts_file(path: &str, req: Request) -> Result<Response> {
    match ServeFile::new(path).oneshot(req).await {
        Ok(response) => Ok(response.into_response()),
        Err(err) => Err(Error::Internal(err.to_string())),
    }
}
