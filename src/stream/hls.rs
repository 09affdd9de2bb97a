//! HLS manifest rewriter.
//!
//! Fetches the upstream playlist and rewrites every tag URI and segment line
//! to route back through the proxy, preserving all other tag text and line
//! order byte-for-byte.

use axum::http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    proxy::{encode_header_params, RoutingClient},
    types::{StreamBody, StreamRequest, StreamResponse},
    urlutil, Result,
};

/// CDNs whose segment tokens expire in seconds; proxying them loses the race.
const BYPASS_PROXY_CDNS: &[&str] = &["planetary.lovecdn.ru", "lovecdn.ru", "freeshot"];

pub struct HlsHandler {
    client: Arc<RoutingClient>,
    base_url: String,
}

impl HlsHandler {
    pub fn new(client: Arc<RoutingClient>, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub fn can_handle(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        lower.contains(".m3u8")
            || lower.contains("/hls/")
            || (lower.contains("manifest")
                && !lower.contains(".mpd")
                && !lower.contains("format=mpd"))
    }

    pub async fn handle_manifest(&self, req: &StreamRequest) -> Result<StreamResponse> {
        tracing::debug!(url = %req.url, no_bypass = req.no_bypass, "handling HLS manifest");

        let upstream = self.client.get(&req.url, &req.headers).await?;
        let status = upstream.status();
        if status != StatusCode::OK {
            tracing::warn!(url = %req.url, status = %status, "manifest fetch failed");
            // Forward the real upstream status so players see 401/403/404.
            return Ok(StreamResponse::status(status));
        }

        let body = upstream.text().await?;
        let rewritten = self.rewrite_manifest(&body, &req.url, &req.headers, req.no_bypass);

        Ok(StreamResponse::manifest(rewritten))
    }

    pub async fn handle_segment(&self, req: &StreamRequest) -> Result<StreamResponse> {
        tracing::debug!(url = %req.url, "handling HLS segment");

        let upstream = self.client.get(&req.url, &req.headers).await?;
        let status = upstream.status();
        let content_type = upstream
            .header("Content-Type")
            .unwrap_or_else(|| "video/MP2T".to_string());

        Ok(StreamResponse {
            status,
            content_type: Some(content_type),
            headers: HashMap::new(),
            body: StreamBody::Upstream(upstream),
            redirect_url: None,
        })
    }

    /// Rewrite a playlist body. Pure on its inputs.
    pub fn rewrite_manifest(
        &self,
        manifest: &str,
        original_url: &str,
        headers: &HashMap<String, String>,
        no_bypass: bool,
    ) -> String {
        // no_bypass forces every segment through the proxy (recordings).
        let bypass_segments = !no_bypass && should_bypass_proxy(original_url);

        let mut out = String::with_capacity(manifest.len() * 2);
        for line in manifest.lines() {
            if line.trim().is_empty() {
                out.push_str(line);
                out.push('\n');
                continue;
            }

            if line.starts_with('#') {
                if line.contains("URI=") {
                    out.push_str(&self.rewrite_uri_tag(
                        line,
                        original_url,
                        headers,
                        bypass_segments,
                    ));
                } else {
                    out.push_str(line);
                }
                out.push('\n');
                continue;
            }

            let segment_url = urlutil::resolve_url(line, original_url);

            // Sub-manifests are always proxied so injected headers propagate;
            // only actual segments may go direct.
            let is_manifest = segment_url.to_lowercase().contains(".m3u8");
            let bypass = !is_manifest
                && (bypass_segments || (!no_bypass && should_bypass_proxy(&segment_url)));

            if bypass {
                out.push_str(&segment_url);
            } else {
                out.push_str(&self.build_proxy_url(&segment_url, headers));
            }
            out.push('\n');
        }

        out
    }

    fn rewrite_uri_tag(
        &self,
        line: &str,
        original_url: &str,
        headers: &HashMap<String, String>,
        bypass: bool,
    ) -> String {
        let Some(start) = line.find("URI=\"") else {
            return line.to_string();
        };
        let start = start + 5;
        let Some(end) = line[start..].find('"') else {
            return line.to_string();
        };

        let uri = &line[start..start + end];
        let resolved = urlutil::resolve_url(uri, original_url);

        let replacement = if bypass || should_bypass_proxy(&resolved) {
            resolved
        } else {
            self.build_proxy_url(&resolved, headers)
        };

        format!("{}{}{}", &line[..start], replacement, &line[start + end..])
    }

    /// `<base>/proxy/manifest.m3u8` for nested playlists, `<base>/proxy/stream`
    /// for everything else, with the target and `h_*` headers in the query.
    fn build_proxy_url(&self, target: &str, headers: &HashMap<String, String>) -> String {
        let path = if target.to_lowercase().contains(".m3u8") {
            "/proxy/manifest.m3u8"
        } else {
            "/proxy/stream"
        };

        let mut url = match url::Url::parse(&format!("{}{}", self.base_url, path)) {
            Ok(url) => url,
            Err(_) => return target.to_string(),
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", target);
            for (key, value) in encode_header_params(headers) {
                query.append_pair(&key, &value);
            }
        }
        url.to_string()
    }
}

fn should_bypass_proxy(url: &str) -> bool {
    let lower = url.to_lowercase();
    BYPASS_PROXY_CDNS.iter().any(|cdn| lower.contains(cdn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::RoutingClient;

    fn handler() -> HlsHandler {
        HlsHandler::new(
            Arc::new(RoutingClient::new(Vec::new(), Vec::new())),
            "https://p".to_string(),
        )
    }

    fn referer_headers() -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), "https://origin/".to_string());
        headers
    }

    #[test]
    fn test_can_handle() {
        let h = handler();
        assert!(h.can_handle("https://x/master.m3u8"));
        assert!(h.can_handle("https://x/hls/live"));
        assert!(h.can_handle("https://x/manifest"));
        assert!(!h.can_handle("https://x/manifest(format=mpd)"));
        assert!(!h.can_handle("https://x/stream.mpd"));
        assert!(!h.can_handle("https://x/movie.mp4"));
    }

    #[test]
    fn test_rewrite_manifest_full() {
        let h = handler();
        let manifest = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\nseg0.ts\n\nseg1.ts";
        let out = h.rewrite_manifest(
            manifest,
            "https://cdn.example.com/live/master.m3u8",
            &referer_headers(),
            false,
        );

        let expected = "#EXTM3U\n\
            #EXT-X-KEY:METHOD=AES-128,URI=\"https://p/proxy/stream?url=https%3A%2F%2Fcdn.example.com%2Flive%2Fkey.bin&h_Referer=https%3A%2F%2Forigin%2F\"\n\
            https://p/proxy/stream?url=https%3A%2F%2Fcdn.example.com%2Flive%2Fseg0.ts&h_Referer=https%3A%2F%2Forigin%2F\n\
            \n\
            https://p/proxy/stream?url=https%3A%2F%2Fcdn.example.com%2Flive%2Fseg1.ts&h_Referer=https%3A%2F%2Forigin%2F\n";
        assert_eq!(out, expected);
    }

    #[test]
    fn test_rewrite_preserves_line_count_and_order() {
        let h = handler();
        let manifest = "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:6.0,\nseg.ts\n#EXT-X-ENDLIST";
        let out = h.rewrite_manifest(manifest, "https://c/x.m3u8", &HashMap::new(), false);

        let in_lines: Vec<&str> = manifest.lines().collect();
        let out_lines: Vec<&str> = out.lines().collect();
        assert_eq!(in_lines.len(), out_lines.len());
        // Non-URI tags survive byte-for-byte.
        assert_eq!(out_lines[0], "#EXTM3U");
        assert_eq!(out_lines[1], "#EXT-X-VERSION:3");
        assert_eq!(out_lines[2], "#EXTINF:6.0,");
        assert_eq!(out_lines[4], "#EXT-X-ENDLIST");
    }

    #[test]
    fn test_bypass_cdn_segments_direct() {
        let h = handler();
        let manifest = "#EXTM3U\nchunk0.ts\nsub/playlist.m3u8";
        let out = h.rewrite_manifest(
            manifest,
            "https://planetary.lovecdn.ru/ch/master.m3u8",
            &HashMap::new(),
            false,
        );
        let lines: Vec<&str> = out.lines().collect();
        // Segments emit as direct upstream URLs.
        assert_eq!(lines[1], "https://planetary.lovecdn.ru/ch/chunk0.ts");
        // Sub-manifests still go through the proxy.
        assert!(lines[2].starts_with("https://p/proxy/manifest.m3u8?"));
    }

    #[test]
    fn test_no_bypass_forces_proxy() {
        let h = handler();
        let manifest = "#EXTM3U\nchunk0.ts";
        let out = h.rewrite_manifest(
            manifest,
            "https://planetary.lovecdn.ru/ch/master.m3u8",
            &HashMap::new(),
            true,
        );
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[1].starts_with("https://p/proxy/stream?"));
    }

    #[test]
    fn test_bypass_segment_url_match() {
        // A segment pointing at a bypass CDN goes direct even when the
        // manifest host is not a bypass CDN.
        let h = handler();
        let manifest = "#EXTM3U\nhttps://freeshot.example/seg.ts";
        let out = h.rewrite_manifest(manifest, "https://cdn.com/m.m3u8", &HashMap::new(), false);
        assert_eq!(out.lines().nth(1).unwrap(), "https://freeshot.example/seg.ts");
    }

    #[test]
    fn test_build_proxy_url_picks_manifest_endpoint() {
        let h = handler();
        let url = h.build_proxy_url("https://c/sub.m3u8", &HashMap::new());
        assert!(url.starts_with("https://p/proxy/manifest.m3u8?url="));
        let url = h.build_proxy_url("https://c/seg.ts", &HashMap::new());
        assert!(url.starts_with("https://p/proxy/stream?url="));
    }
}
