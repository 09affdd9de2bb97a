//! Proxy endpoints: manifest dispatch and generic stream/segment pass-through.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;

use crate::{
    server::{params::parse_stream_request, state::AppState},
    types::StreamRequest,
    Error, Result,
};

/// GET /proxy/manifest.m3u8 (and the /proxy/hls/, /proxy/mpd/ aliases).
pub async fn proxy_manifest(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let req = parse_stream_request(&query);
    if req.url.is_empty() {
        return Err(Error::MissingParameter("url"));
    }

    tracing::debug!(url = %req.url, "proxy manifest request");
    let response = state.service.handle_manifest(req).await?;
    Ok(response.into_response())
}

/// GET /proxy/stream and the per-segment aliases.
pub async fn proxy_stream(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let req = parse_stream_request(&query);
    if req.url.is_empty() {
        return Err(Error::MissingParameter("url"));
    }

    tracing::debug!(url = %req.url, "proxy stream request");
    let response = state.service.handle_segment(req).await?;
    Ok(response.into_response())
}

/// GET /segment/{filename} — raw segment proxy keyed by `base_url`.
pub async fn segment(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let base_url = query
        .get("base_url")
        .cloned()
        .ok_or(Error::MissingParameter("base_url"))?;

    let req = StreamRequest {
        url: base_url,
        headers: crate::proxy::decode_header_params(&query),
        ..Default::default()
    };

    let response = state.service.handle_segment(req).await?;
    Ok(response.into_response())
}
