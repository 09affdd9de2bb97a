//! Routing HTTP client.
//!
//! One transport per kind: a default pooled transport (IPv4-only dial), lazy
//! per-pattern proxy transports, and a browser-fingerprint transport for
//! protected CDNs that gate on the TLS ClientHello rather than headers.

use crate::{config::TransportRoute, Result};
use axum::body::Body;
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT},
    Client, StatusCode,
};
use rquest::tls::Impersonate;
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    sync::RwLock,
    time::Duration,
};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Hostname substrings that require the browser-fingerprint transport.
const PROTECTED_CDNS: &[&str] = &["newkso.ru", "dlhd.", "daddylive"];

/// Which transport a URL resolves to. Exposed for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Browser,
    Route { pattern: String },
    GlobalProxy { proxy: String },
    Default,
}

/// A response from either transport family. The browser transport is a
/// different client type, so upstream responses are consumed through this
/// wrapper rather than a concrete response type.
pub enum UpstreamResponse {
    Standard(reqwest::Response),
    Browser(rquest::Response),
}

impl UpstreamResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Standard(response) => response.status(),
            Self::Browser(response) => StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        }
    }

    /// First value of a response header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<String> {
        match self {
            Self::Standard(response) => response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            Self::Browser(response) => response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    pub async fn text(self) -> Result<String> {
        match self {
            Self::Standard(response) => Ok(response.text().await?),
            Self::Browser(response) => Ok(response.text().await?),
        }
    }

    pub async fn bytes(self) -> Result<Bytes> {
        match self {
            Self::Standard(response) => Ok(response.bytes().await?),
            Self::Browser(response) => Ok(response.bytes().await?),
        }
    }

    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| crate::Error::Internal(e.to_string()))
    }

    /// Stream the body into an HTTP response without buffering.
    pub fn into_body(self) -> Body {
        match self {
            Self::Standard(response) => Body::from_stream(response.bytes_stream()),
            Self::Browser(response) => Body::from_stream(response.bytes_stream()),
        }
    }
}

pub struct RoutingClient {
    default_client: Client,
    browser_client: rquest::Client,
    routes: Vec<TransportRoute>,
    global_proxies: Vec<String>,
    /// Cache keyed by `(proxy_url, insecure)`.
    proxy_clients: RwLock<HashMap<String, Client>>,
}

impl RoutingClient {
    pub fn new(routes: Vec<TransportRoute>, global_proxies: Vec<String>) -> Self {
        Self {
            default_client: build_client(None, false)
                .unwrap_or_else(|_| Client::new()),
            browser_client: build_browser_client(),
            routes,
            global_proxies,
            proxy_clients: RwLock::new(HashMap::new()),
        }
    }

    /// Decide which transport a target URL uses.
    pub fn select_transport(&self, url: &str) -> Transport {
        let lower = url.to_lowercase();
        if PROTECTED_CDNS.iter().any(|cdn| lower.contains(cdn)) {
            return Transport::Browser;
        }

        for route in &self.routes {
            if url.contains(&route.url_pattern) {
                return Transport::Route {
                    pattern: route.url_pattern.clone(),
                };
            }
        }

        if let Some(proxy) = self.global_proxies.first() {
            return Transport::GlobalProxy {
                proxy: proxy.clone(),
            };
        }

        Transport::Default
    }

    /// Client for the non-browser transports.
    fn standard_client(&self, url: &str, transport: Transport) -> Client {
        match transport {
            Transport::Browser | Transport::Default => self.default_client.clone(),
            Transport::Route { pattern } => {
                let route = self
                    .routes
                    .iter()
                    .find(|r| r.url_pattern == pattern)
                    .cloned()
                    .unwrap_or_default();
                tracing::debug!(url, pattern = %route.url_pattern, "matched transport route");
                if route.direct {
                    if route.disable_ssl {
                        return self.proxy_client(None, true);
                    }
                    return self.default_client.clone();
                }
                if route.proxy.is_some() || route.disable_ssl {
                    return self.proxy_client(route.proxy.as_deref(), route.disable_ssl);
                }
                self.default_client.clone()
            }
            Transport::GlobalProxy { proxy } => {
                tracing::debug!(url, proxy = %proxy, "using global proxy");
                self.proxy_client(Some(&proxy), false)
            }
        }
    }

    /// Cached proxy client, built lazily. A broken proxy URL falls back to
    /// the default transport with a warning.
    fn proxy_client(&self, proxy_url: Option<&str>, insecure: bool) -> Client {
        let mut cache_key = proxy_url.unwrap_or("").to_string();
        if insecure {
            cache_key.push_str(":insecure");
        }

        if let Some(client) = self.proxy_clients.read().unwrap().get(&cache_key) {
            return client.clone();
        }

        let mut cache = self.proxy_clients.write().unwrap();
        // Double-check after acquiring the write lock.
        if let Some(client) = cache.get(&cache_key) {
            return client.clone();
        }

        let client = match build_client(proxy_url, insecure) {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(proxy = ?proxy_url, %err, "failed to build proxy client, using default");
                self.default_client.clone()
            }
        };
        cache.insert(cache_key, client.clone());
        client
    }

    /// GET a URL with forwarded headers, injecting the default User-Agent
    /// when none was supplied. Returns the raw upstream response.
    pub async fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<UpstreamResponse> {
        match self.select_transport(url) {
            Transport::Browser => {
                tracing::debug!(url, "using browser-fingerprint transport");
                // The impersonated profile carries its own browser headers;
                // forwarded headers override them.
                let mut request = self.browser_client.get(url);
                for (key, value) in headers {
                    request = request.header(key.as_str(), value.as_str());
                }
                Ok(UpstreamResponse::Browser(request.send().await?))
            }
            transport => {
                let client = self.standard_client(url, transport);
                let request = client.get(url).headers(build_header_map(headers));
                Ok(UpstreamResponse::Standard(request.send().await?))
            }
        }
    }

    /// POST a JSON body with forwarded headers through the routed transport.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<UpstreamResponse> {
        let payload =
            serde_json::to_vec(body).map_err(|e| crate::Error::Internal(e.to_string()))?;

        match self.select_transport(url) {
            Transport::Browser => {
                let mut request = self
                    .browser_client
                    .post(url)
                    .header("Content-Type", "application/json")
                    .body(payload);
                for (key, value) in headers {
                    request = request.header(key.as_str(), value.as_str());
                }
                Ok(UpstreamResponse::Browser(request.send().await?))
            }
            transport => {
                let client = self.standard_client(url, transport);
                let request = client
                    .post(url)
                    .headers(build_header_map(headers))
                    .header("Content-Type", "application/json")
                    .body(payload);
                Ok(UpstreamResponse::Standard(request.send().await?))
            }
        }
    }

    /// GET a URL and materialize the body, requiring a 200 status.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Bytes> {
        let response = self.get(url, headers).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(crate::Error::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }
        response.bytes().await
    }
}

fn build_client(proxy_url: Option<&str>, insecure: bool) -> Result<Client> {
    let mut builder = Client::builder()
        // Binding to an IPv4 address forces IPv4-only dialing; avoids
        // environments where IPv6 routes exist but do not work.
        .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10);

    if insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(proxy_url) = proxy_url {
        if !proxy_url.is_empty() {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| crate::Error::InvalidUrl(format!("proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
    }

    builder
        .build()
        .map_err(|e| crate::Error::Internal(e.to_string()))
}

/// Transport with a fixed Chrome ClientHello (BoringSSL-backed). The
/// handshake negotiates ALPN and speaks h2 or HTTP/1.1 accordingly; the
/// impersonated profile also supplies the matching browser headers.
fn build_browser_client() -> rquest::Client {
    rquest::Client::builder()
        .impersonate(Impersonate::Chrome120)
        .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| rquest::Client::new())
}

fn build_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes());
        let value = HeaderValue::from_str(value);
        if let (Ok(name), Ok(value)) = (name, value) {
            map.insert(name, value);
        }
    }
    if !map.contains_key(USER_AGENT) {
        map.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routed_client() -> RoutingClient {
        RoutingClient::new(
            vec![
                TransportRoute {
                    url_pattern: "special.example.com".to_string(),
                    proxy: Some("socks5://127.0.0.1:1080".to_string()),
                    disable_ssl: false,
                    direct: false,
                },
                TransportRoute {
                    url_pattern: "direct.example.com".to_string(),
                    proxy: None,
                    disable_ssl: false,
                    direct: true,
                },
            ],
            vec!["http://global-proxy:8080".to_string()],
        )
    }

    #[test]
    fn test_protected_cdn_uses_browser_transport() {
        let client = routed_client();
        assert_eq!(
            client.select_transport("https://cdn.newkso.ru/stream/x.m3u8"),
            Transport::Browser
        );
        assert_eq!(
            client.select_transport("https://dlhd.click/watch/1"),
            Transport::Browser
        );
    }

    #[test]
    fn test_route_match_wins_over_global_proxy() {
        let client = routed_client();
        assert_eq!(
            client.select_transport("https://special.example.com/a.ts"),
            Transport::Route {
                pattern: "special.example.com".to_string()
            }
        );
    }

    #[test]
    fn test_global_proxy_when_no_route_matches() {
        let client = routed_client();
        assert_eq!(
            client.select_transport("https://other.com/a.ts"),
            Transport::GlobalProxy {
                proxy: "http://global-proxy:8080".to_string()
            }
        );
    }

    #[test]
    fn test_default_transport_without_proxies() {
        let client = RoutingClient::new(Vec::new(), Vec::new());
        assert_eq!(
            client.select_transport("https://other.com/a.ts"),
            Transport::Default
        );
    }

    #[test]
    fn test_default_user_agent_injected() {
        let map = build_header_map(&HashMap::new());
        assert_eq!(map.get(USER_AGENT).unwrap(), DEFAULT_USER_AGENT);

        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "custom".to_string());
        let map = build_header_map(&headers);
        assert_eq!(map.get(USER_AGENT).unwrap(), "custom");
    }
}
