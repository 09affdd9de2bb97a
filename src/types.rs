//! Core domain types shared across handlers, services and the HTTP edge.

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of stream a handler processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Hls,
    Mpd,
    Generic,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hls => "hls",
            Self::Mpd => "mpd",
            Self::Generic => "generic",
        }
    }
}

/// An incoming stream proxy request, immutable after parse.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Format: "KID:KEY" or "KID1:KEY1,KID2:KEY2"
    pub clear_key: Option<String>,
    pub key_id: Option<String>,
    pub key: Option<String>,
    pub redirect_stream: bool,
    pub force: bool,
    pub extension: Option<String>,
    /// DASH media playlist selector.
    pub rep_id: Option<String>,
    /// Disable the bypass-CDN shortcut (recorder sets this).
    pub no_bypass: bool,
}

/// The body of a stream response.
pub enum StreamBody {
    Full(Bytes),
    /// Streamed pass-through of an upstream response body.
    Upstream(crate::proxy::UpstreamResponse),
    Empty,
}

/// The result of stream processing, converted into an HTTP response by the
/// edge. The writer owns and closes the body.
pub struct StreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: StreamBody,
    /// If set, perform a redirect instead.
    pub redirect_url: Option<String>,
}

impl StreamResponse {
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            headers: HashMap::new(),
            body: StreamBody::Empty,
            redirect_url: None,
        }
    }

    pub fn manifest(body: String) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "Cache-Control".to_string(),
            "no-cache, no-store, must-revalidate".to_string(),
        );
        Self {
            status: StatusCode::OK,
            content_type: Some("application/vnd.apple.mpegurl".to_string()),
            headers,
            body: StreamBody::Full(Bytes::from(body)),
            redirect_url: None,
        }
    }

    pub fn redirect(url: String) -> Self {
        Self {
            status: StatusCode::FOUND,
            content_type: None,
            headers: HashMap::new(),
            body: StreamBody::Empty,
            redirect_url: Some(url),
        }
    }
}

/// 302 Found; players follow it with the original method.
pub fn redirect_found(url: &str) -> Response {
    match HeaderValue::from_str(url) {
        Ok(location) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::FOUND;
            response.headers_mut().insert(header::LOCATION, location);
            response
        }
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

impl IntoResponse for StreamResponse {
    fn into_response(self) -> Response {
        if let Some(url) = self.redirect_url {
            return redirect_found(&url);
        }

        let mut response = match self.body {
            StreamBody::Full(bytes) => Response::new(Body::from(bytes)),
            StreamBody::Upstream(upstream) => Response::new(upstream.into_body()),
            StreamBody::Empty => Response::new(Body::empty()),
        };
        *response.status_mut() = self.status;

        if let Some(ct) = self.content_type {
            if let Ok(value) = HeaderValue::from_str(&ct) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
        }
        for (key, value) in self.headers {
            let name = HeaderName::from_bytes(key.as_bytes());
            let value = HeaderValue::from_str(&value);
            if let (Ok(name), Ok(value)) = (name, value) {
                response.headers_mut().insert(name, value);
            }
        }

        response
    }
}

/// The result of URL extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResult {
    pub destination_url: String,
    pub request_headers: HashMap<String, String>,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// Endpoint kinds an extractor can route to.
pub const ENDPOINT_HLS_MANIFEST: &str = "hls_manifest_proxy";
pub const ENDPOINT_MPD_MANIFEST: &str = "mpd_manifest_proxy";
pub const ENDPOINT_PROXY_STREAM: &str = "proxy_stream_endpoint";

/// A DVR recording, as persisted in the JSON catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub name: String,
    pub url: String,
    pub started_at: i64,
    pub status: RecordingStatus,
    #[serde(default)]
    pub duration: i64,
    pub file_path: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clearkey: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Recording,
    Completed,
    Failed,
}
