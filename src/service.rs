//! Proxy dispatch: URL normalization, extractor invocation, handler routing.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine,
};
use std::sync::Arc;

use crate::{
    extractors::ExtractorRegistry,
    proxy::encode_header_params,
    stream::StreamHandlerRegistry,
    types::{
        ExtractResult, StreamRequest, StreamResponse, StreamType, ENDPOINT_HLS_MANIFEST,
        ENDPOINT_MPD_MANIFEST,
    },
    Error, Result,
};

pub struct ProxyService {
    stream_handlers: Arc<StreamHandlerRegistry>,
    extractors: Arc<ExtractorRegistry>,
    base_url: String,
}

impl ProxyService {
    pub fn new(
        stream_handlers: Arc<StreamHandlerRegistry>,
        extractors: Arc<ExtractorRegistry>,
        base_url: String,
    ) -> Self {
        Self {
            stream_handlers,
            extractors,
            base_url,
        }
    }

    pub async fn handle_manifest(&self, mut req: StreamRequest) -> Result<StreamResponse> {
        req.url = decode_url(&req.url);

        // Hosting-platform URLs resolve through their site extractor first.
        if let Some(extractor) = self.extractors.get_site_extractor(&req.url) {
            tracing::debug!(url = %req.url, extractor = extractor.name(), "URL needs extraction");
            let result = extractor
                .extract(&req.url, &req.headers)
                .await
                .map_err(|e| Error::ExtractionFailed(e.to_string()))?;

            req.url = result.destination_url;
            // Extractor-supplied headers overwrite caller headers.
            for (key, value) in result.request_headers {
                req.headers.insert(key, value);
            }
        }

        let handler = self
            .stream_handlers
            .get(&req.url)
            .ok_or_else(|| Error::Internal(format!("no handler for URL: {}", req.url)))?;

        tracing::debug!(url = %req.url, kind = handler.kind().as_str(), "using stream handler");
        handler.handle_manifest(&req).await
    }

    pub async fn handle_segment(&self, mut req: StreamRequest) -> Result<StreamResponse> {
        req.url = decode_url(&req.url);

        let handler = self
            .stream_handlers
            .get(&req.url)
            .or_else(|| self.stream_handlers.get_by_type(StreamType::Generic))
            .ok_or_else(|| Error::Internal(format!("no handler for URL: {}", req.url)))?;

        handler.handle_segment(&req).await
    }

    pub async fn handle_extract(
        &self,
        url: &str,
        headers: &std::collections::HashMap<String, String>,
    ) -> Result<ExtractResult> {
        let url = decode_url(url);

        let extractor = self
            .extractors
            .get(&url)
            .ok_or_else(|| Error::ExtractionFailed(format!("no extractor for URL: {url}")))?;

        tracing::debug!(url = %url, extractor = extractor.name(), "using extractor");
        let mut result = extractor.extract(&url, headers).await?;
        result.proxy_url = Some(self.build_proxy_url(
            &result.destination_url,
            &result.request_headers,
            &result.endpoint,
        ));
        Ok(result)
    }

    fn build_proxy_url(
        &self,
        destination: &str,
        headers: &std::collections::HashMap<String, String>,
        endpoint: &str,
    ) -> String {
        let path = match endpoint {
            ENDPOINT_HLS_MANIFEST | "hls_proxy" => "/proxy/hls/manifest.m3u8",
            ENDPOINT_MPD_MANIFEST => "/proxy/mpd/manifest.m3u8",
            _ => "/proxy/stream",
        };

        let mut url = match url::Url::parse(&format!("{}{}", self.base_url, path)) {
            Ok(url) => url,
            Err(_) => return destination.to_string(),
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", destination);
            for (key, value) in encode_header_params(headers) {
                query.append_pair(&key, &value);
            }
        }
        url.to_string()
    }
}

/// Normalize a target URL: percent-decode, then try base64 (standard and
/// URL-safe, with padding repair) when the result is not already http(s).
pub fn decode_url(url: &str) -> String {
    if url.is_empty() {
        return url.to_string();
    }

    let mut url = url.to_string();
    if let Ok(decoded) = percent_decode(&url) {
        if decoded != url {
            url = decoded;
        }
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        return url;
    }

    let padded = match url.len() % 4 {
        2 => format!("{url}=="),
        3 => format!("{url}="),
        _ => url.clone(),
    };

    for engine in [&STANDARD, &URL_SAFE] {
        if let Ok(decoded) = engine.decode(&padded) {
            if let Ok(text) = String::from_utf8(decoded) {
                if text.starts_with("http://") || text.starts_with("https://") {
                    return text;
                }
            }
        }
    }

    url
}

fn percent_decode(s: &str) -> std::result::Result<String, std::str::Utf8Error> {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        if bytes[i] == b'+' {
            out.push(b' ');
        } else {
            out.push(bytes[i]);
        }
        i += 1;
    }
    std::str::from_utf8(&out).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_url_plain() {
        assert_eq!(decode_url("https://x/a.m3u8"), "https://x/a.m3u8");
    }

    #[test]
    fn test_decode_url_percent_encoded() {
        assert_eq!(
            decode_url("https%3A%2F%2Fx%2Fa.m3u8"),
            "https://x/a.m3u8"
        );
    }

    #[test]
    fn test_decode_url_base64() {
        let encoded = STANDARD.encode("https://x/a.m3u8");
        assert_eq!(decode_url(&encoded), "https://x/a.m3u8");
    }

    #[test]
    fn test_decode_url_base64_padding_repair() {
        let encoded = STANDARD.encode("https://x/a.m3u8");
        let unpadded = encoded.trim_end_matches('=');
        assert_eq!(decode_url(unpadded), "https://x/a.m3u8");
    }

    #[test]
    fn test_decode_url_base64_urlsafe() {
        let encoded = URL_SAFE.encode("https://x/watch?a=1&b=2");
        assert_eq!(decode_url(&encoded), "https://x/watch?a=1&b=2");
    }

    #[test]
    fn test_decode_url_garbage_passthrough() {
        assert_eq!(decode_url("not-a-url"), "not-a-url");
    }
}
