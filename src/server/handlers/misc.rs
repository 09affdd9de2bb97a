//! Status pages, license/key endpoints, extraction API, transcoded-stream
//! file serving.

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::{
    proxy::decode_header_params, server::state::AppState, types::redirect_found, Error, Result,
};

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html>\
         <html><head><title>nagare</title></head>\
         <body><h1>nagare</h1><p>Media streaming proxy is running.</p>\
         <p><a href=\"/api/info\">API status</a></p></body></html>",
    )
}

/// GET /info
pub async fn info() -> Html<String> {
    Html(format!(
        "<!DOCTYPE html><html><head><title>nagare - Info</title></head>\
         <body><h1>nagare</h1><p>Version: {}</p></body></html>",
        env!("CARGO_PKG_VERSION")
    ))
}

/// GET /api/info
pub async fn api_info() -> Json<serde_json::Value> {
    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /favicon.ico
pub async fn favicon() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// GET /proxy/ip — the server's public address, for proxy debugging.
pub async fn public_ip(State(state): State<AppState>) -> Result<Response> {
    let ip = state
        .client
        .fetch_bytes("https://api.ipify.org", &HashMap::new())
        .await?;
    let ip = String::from_utf8_lossy(&ip).to_string();
    Ok(Json(json!({"ip": ip})).into_response())
}

/// GET /extractor and /extractor/video
pub async fn extract(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let url = query
        .get("url")
        .or_else(|| query.get("d"))
        .cloned()
        .ok_or(Error::MissingParameter("url"))?;

    let headers = decode_header_params(&query);
    let result = state.service.handle_extract(&url, &headers).await?;

    if query.get("redirect_stream").map(String::as_str) == Some("true") {
        if let Some(proxy_url) = &result.proxy_url {
            return Ok(redirect_found(proxy_url));
        }
    }

    Ok(Json(result).into_response())
}

/// GET|POST /license — ClearKey license JSON, or 501 for license proxying.
pub async fn license(Query(query): Query<HashMap<String, String>>) -> Result<Response> {
    if let Some(clearkey) = query.get("clearkey").filter(|c| !c.is_empty()) {
        return Ok(Json(clearkey_license(clearkey)).into_response());
    }

    if query.contains_key("url") {
        return Err(Error::NotImplemented("license proxy"));
    }

    Err(Error::MissingParameter("clearkey"))
}

/// The fixed ClearKey license shape: one `oct` entry per KID:KEY pair.
pub fn clearkey_license(clearkey: &str) -> serde_json::Value {
    let keys: Vec<serde_json::Value> = clearkey
        .split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(kid, key)| json!({"kty": "oct", "kid": kid, "k": key}))
        .collect();

    json!({"keys": keys, "type": "temporary"})
}

/// GET /key — AES-128 key pass-through.
pub async fn key(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let url = query
        .get("url")
        .cloned()
        .ok_or(Error::MissingParameter("url"))?;

    let headers = decode_header_params(&query);
    let body = state.client.fetch_bytes(&url, &headers).await?;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response())
}

/// GET /ffmpeg_stream/{stream_id}/{filename} — serve transcoded HLS output.
pub async fn ffmpeg_stream(
    State(state): State<AppState>,
    Path((stream_id, filename)): Path<(String, String)>,
    req: Request,
) -> Result<Response> {
    // Path traversal guard: the filename must stay inside the stream dir.
    if filename.contains("..") || filename.contains('/') {
        return Err(Error::MissingParameter("filename"));
    }

    state.transcoder.touch(&stream_id).await;

    let file_path = state.transcoder.stream_path(&stream_id).join(&filename);
    if tokio::fs::metadata(&file_path).await.is_err() {
        return Err(Error::NotFound("stream file not found".to_string()));
    }

    let mut response = match ServeFile::new(&file_path).oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(err) => return Err(Error::Internal(err.to_string())),
    };
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    Ok(response)
}

/// Addon surface lives outside this service.
pub async fn not_implemented() -> Response {
    Error::NotImplemented("stremio addon").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clearkey_license_single() {
        let license = clearkey_license("kid1:key1");
        assert_eq!(license["type"], "temporary");
        assert_eq!(license["keys"][0]["kty"], "oct");
        assert_eq!(license["keys"][0]["kid"], "kid1");
        assert_eq!(license["keys"][0]["k"], "key1");
    }

    #[test]
    fn test_clearkey_license_multi() {
        let license = clearkey_license("kid1:key1,kid2:key2");
        assert_eq!(license["keys"].as_array().unwrap().len(), 2);
        assert_eq!(license["keys"][1]["kid"], "kid2");
    }

    #[test]
    fn test_clearkey_license_skips_malformed_pairs() {
        let license = clearkey_license("kid1:key1,garbage");
        assert_eq!(license["keys"].as_array().unwrap().len(), 1);
    }
}
