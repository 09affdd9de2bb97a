//! Pass-through handler for direct media files (MP4, MKV, TS, ...).

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    proxy::RoutingClient,
    types::{StreamBody, StreamRequest, StreamResponse},
    Result,
};

const GENERIC_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".avi", ".webm", ".ts", ".m4s", ".m4v", ".mov",
];

pub struct GenericHandler {
    client: Arc<RoutingClient>,
}

impl GenericHandler {
    pub fn new(client: Arc<RoutingClient>) -> Self {
        Self { client }
    }

    pub fn can_handle(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        GENERIC_EXTENSIONS.iter().any(|ext| lower.contains(ext))
    }

    /// Proxy the stream content, forwarding the upstream status and
    /// content-type and advertising range support.
    pub async fn handle_segment(&self, req: &StreamRequest) -> Result<StreamResponse> {
        tracing::debug!(url = %req.url, "handling generic stream");

        let upstream = self.client.get(&req.url, &req.headers).await?;
        let status = upstream.status();

        let content_type = upstream
            .header("Content-Type")
            .unwrap_or_else(|| guess_content_type(&req.url).to_string());

        let mut headers = HashMap::new();
        for name in ["Content-Length", "Content-Range"] {
            if let Some(value) = upstream.header(name) {
                headers.insert(name.to_string(), value);
            }
        }
        headers.insert("Accept-Ranges".to_string(), "bytes".to_string());

        Ok(StreamResponse {
            status,
            content_type: Some(content_type),
            headers,
            body: StreamBody::Upstream(upstream),
            redirect_url: None,
        })
    }
}

pub fn guess_content_type(url: &str) -> &'static str {
    let path = url.split('?').next().unwrap_or(url);
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "ts" => "video/MP2T",
        "m4s" => "video/iso.segment",
        "m4v" => "video/x-m4v",
        "mov" => "video/quicktime",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::RoutingClient;

    #[test]
    fn test_can_handle() {
        let handler = GenericHandler::new(Arc::new(RoutingClient::new(Vec::new(), Vec::new())));
        assert!(handler.can_handle("https://x/movie.MP4"));
        assert!(handler.can_handle("https://x/seg.m4s?tok=1"));
        assert!(!handler.can_handle("https://x/master.m3u8"));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("https://x/a.ts?b=c"), "video/MP2T");
        assert_eq!(guess_content_type("https://x/a.mkv"), "video/x-matroska");
        assert_eq!(guess_content_type("https://x/a.unknown"), "application/octet-stream");
    }
}
