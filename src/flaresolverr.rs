//! Client for a FlareSolverr instance: browser emulation that solves
//! Cloudflare challenges and hands back page HTML plus session cookies.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub expires: i64,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Solution {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default, rename = "userAgent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize)]
pub struct FlareResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub solution: Solution,
}

#[derive(Serialize)]
struct FlareRequest<'a> {
    cmd: &'static str,
    url: &'a str,
    #[serde(rename = "maxTimeout")]
    max_timeout: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cookies: Vec<Cookie>,
}

pub struct FlareSolverrClient {
    base_url: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl FlareSolverrClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            // Buffer past the solver's own timeout for network overhead.
            .timeout(timeout + Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            timeout,
            http,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// Fetch a URL through FlareSolverr, optionally seeding cookies from a
    /// previous solve.
    pub async fn get(&self, target_url: &str, cookies: Vec<Cookie>) -> Result<FlareResponse> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| Error::ExtractionFailed("FlareSolverr not configured".into()))?;

        tracing::debug!(url = target_url, "fetching via FlareSolverr");

        let request = FlareRequest {
            cmd: "request.get",
            url: target_url,
            max_timeout: self.timeout.as_millis() as u64,
            cookies,
        };

        let response = self
            .http
            .post(format!("{base}/v1"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::ExtractionFailed(format!(
                "FlareSolverr returned status {status}: {body}"
            )));
        }

        let parsed: FlareResponse = serde_json::from_str(&body)
            .map_err(|e| Error::ExtractionFailed(format!("FlareSolverr response: {e}")))?;

        if parsed.status != "ok" {
            return Err(Error::ExtractionFailed(format!(
                "FlareSolverr error: {}",
                parsed.message
            )));
        }

        tracing::debug!(
            url = target_url,
            status = parsed.solution.status,
            cookies = parsed.solution.cookies.len(),
            "FlareSolverr request successful"
        );

        Ok(parsed)
    }
}

/// Whether an upstream answer looks like a Cloudflare challenge page that a
/// plain HTTP client cannot pass.
pub fn is_challenge_response(status: u16, body: &str) -> bool {
    if status == 403 {
        return true;
    }
    body.contains("cf-chl") || body.contains("challenge-platform") || body.contains("Just a moment")
}

/// A fetched page plus the session material needed for follow-up requests.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub status: u16,
    pub via_flaresolverr: bool,
}

#[derive(Default)]
struct ScrapeSession {
    cookies: Vec<Cookie>,
    user_agent: Option<String>,
}

/// The two-request scraping pattern site extractors share: try a direct
/// fetch first; on a challenge answer, solve through FlareSolverr and carry
/// the returned cookies and user-agent into subsequent requests so the
/// session stays consistent.
pub struct ChallengeFetcher {
    client: std::sync::Arc<crate::proxy::RoutingClient>,
    flaresolverr: std::sync::Arc<FlareSolverrClient>,
    session: tokio::sync::Mutex<ScrapeSession>,
}

impl ChallengeFetcher {
    pub fn new(
        client: std::sync::Arc<crate::proxy::RoutingClient>,
        flaresolverr: std::sync::Arc<FlareSolverrClient>,
    ) -> Self {
        Self {
            client,
            flaresolverr,
            session: tokio::sync::Mutex::new(ScrapeSession::default()),
        }
    }

    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
        let headers = {
            let session = self.session.lock().await;
            session_headers(&session.cookies, session.user_agent.as_deref())
        };

        match self.client.get(url, &headers).await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                if !is_challenge_response(status, &body) {
                    return Ok(FetchedPage {
                        body,
                        status,
                        via_flaresolverr: false,
                    });
                }
                tracing::info!(url, status, "challenge detected, falling back to FlareSolverr");
            }
            Err(err) => {
                tracing::debug!(url, %err, "direct fetch failed, falling back to FlareSolverr");
            }
        }

        if !self.flaresolverr.is_configured() {
            return Err(Error::ExtractionFailed(
                "challenge detected and FlareSolverr not configured".into(),
            ));
        }

        let seed_cookies = self.session.lock().await.cookies.clone();
        let solved = self.flaresolverr.get(url, seed_cookies).await?;

        {
            let mut session = self.session.lock().await;
            session.cookies = merge_cookies(&session.cookies, &solved.solution.cookies);
            if !solved.solution.user_agent.is_empty() {
                session.user_agent = Some(solved.solution.user_agent.clone());
            }
        }

        Ok(FetchedPage {
            status: solved.solution.status,
            body: solved.solution.response,
            via_flaresolverr: true,
        })
    }
}

/// Headers for a direct request within a scraping session.
fn session_headers(
    cookies: &[Cookie],
    user_agent: Option<&str>,
) -> std::collections::HashMap<String, String> {
    let mut headers = std::collections::HashMap::new();
    if !cookies.is_empty() {
        headers.insert("Cookie".to_string(), cookie_header(cookies));
    }
    if let Some(user_agent) = user_agent {
        headers.insert("User-Agent".to_string(), user_agent.to_string());
    }
    headers
}

pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Later cookies replace earlier ones of the same name.
pub fn merge_cookies(existing: &[Cookie], fresh: &[Cookie]) -> Vec<Cookie> {
    let mut merged: Vec<Cookie> = existing.to_vec();
    for cookie in fresh {
        match merged.iter_mut().find(|c| c.name == cookie.name) {
            Some(slot) => *slot = cookie.clone(),
            None => merged.push(cookie.clone()),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "status": "ok",
            "message": "",
            "solution": {
                "url": "https://target/",
                "status": 200,
                "response": "<html>page</html>",
                "cookies": [{"name": "cf_clearance", "value": "tok", "domain": ".target"}],
                "userAgent": "Mozilla/5.0 solved"
            }
        }"#;
        let parsed: FlareResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, "ok");
        assert_eq!(parsed.solution.status, 200);
        assert_eq!(parsed.solution.cookies[0].name, "cf_clearance");
        assert_eq!(parsed.solution.user_agent, "Mozilla/5.0 solved");
    }

    #[test]
    fn test_request_skips_empty_cookies() {
        let request = FlareRequest {
            cmd: "request.get",
            url: "https://x/",
            max_timeout: 60000,
            cookies: Vec::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("cookies"));
        assert!(json.contains("\"maxTimeout\":60000"));
    }

    #[test]
    fn test_is_challenge_response() {
        assert!(is_challenge_response(403, ""));
        assert!(is_challenge_response(200, "<title>Just a moment...</title>"));
        assert!(is_challenge_response(503, "window._cf_chl_opt = {}"));
        assert!(!is_challenge_response(200, "<html>normal page</html>"));
    }

    #[test]
    fn test_unconfigured_client() {
        let client = FlareSolverrClient::new(None, Duration::from_secs(60));
        assert!(!client.is_configured());
    }

    fn cookie(name: &str, value: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cookie_header() {
        let cookies = vec![cookie("a", "1"), cookie("cf_clearance", "tok")];
        assert_eq!(cookie_header(&cookies), "a=1; cf_clearance=tok");
        assert_eq!(cookie_header(&[]), "");
    }

    #[test]
    fn test_merge_cookies_replaces_by_name() {
        let existing = vec![cookie("a", "old"), cookie("b", "keep")];
        let fresh = vec![cookie("a", "new"), cookie("c", "add")];

        let merged = merge_cookies(&existing, &fresh);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.iter().find(|c| c.name == "a").unwrap().value, "new");
        assert_eq!(merged.iter().find(|c| c.name == "b").unwrap().value, "keep");
        assert_eq!(merged.iter().find(|c| c.name == "c").unwrap().value, "add");
    }

    #[test]
    fn test_session_headers() {
        let headers = session_headers(&[cookie("s", "1")], Some("UA/1.0"));
        assert_eq!(headers.get("Cookie").unwrap(), "s=1");
        assert_eq!(headers.get("User-Agent").unwrap(), "UA/1.0");

        let headers = session_headers(&[], None);
        assert!(headers.is_empty());
    }
}
