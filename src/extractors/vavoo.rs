//! Vavoo.to resolver.
//!
//! Resolving a channel URL needs an `addonSig` signature obtained from the
//! ping API; signatures live ~1 hour upstream so one is cached per process.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::{
    proxy::RoutingClient,
    types::{ExtractResult, ENDPOINT_PROXY_STREAM},
    Error, Result,
};

const PING_URL: &str = "https://www.vavoo.tv/api/app/ping";
const RESOLVE_URL: &str = "https://vavoo.to/mediahubmx-resolve.json";
const SIGNATURE_TTL: Duration = Duration::from_secs(55 * 60);

pub struct VavooExtractor {
    client: Arc<RoutingClient>,
    signature: RwLock<Option<(String, Instant)>>,
}

impl VavooExtractor {
    pub fn new(client: Arc<RoutingClient>) -> Self {
        Self {
            client,
            signature: RwLock::new(None),
        }
    }

    pub fn can_extract(&self, url: &str) -> bool {
        url.to_lowercase().contains("vavoo.to")
    }

    pub async fn extract(&self, url: &str) -> Result<ExtractResult> {
        tracing::debug!(url, "extracting vavoo stream");

        let signature = self.get_signature().await?;
        let resolved = self.resolve_url(url, &signature).await?;

        let mut headers = HashMap::new();
        headers.insert(
            "User-Agent".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
        );

        Ok(ExtractResult {
            destination_url: resolved,
            request_headers: headers,
            endpoint: ENDPOINT_PROXY_STREAM.to_string(),
            proxy_url: None,
        })
    }

    async fn get_signature(&self) -> Result<String> {
        {
            let cached = self.signature.read().await;
            if let Some((sig, fetched_at)) = cached.as_ref() {
                if fetched_at.elapsed() < SIGNATURE_TTL {
                    return Ok(sig.clone());
                }
            }
        }
        self.refresh_signature().await
    }

    async fn refresh_signature(&self) -> Result<String> {
        let mut cached = self.signature.write().await;
        // Double-check after acquiring the write lock.
        if let Some((sig, fetched_at)) = cached.as_ref() {
            if fetched_at.elapsed() < SIGNATURE_TTL {
                return Ok(sig.clone());
            }
        }

        tracing::debug!("refreshing vavoo signature");

        let now_ms = chrono::Utc::now().timestamp_millis();
        let payload = ping_payload(now_ms);

        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "okhttp/4.11.0".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());

        let response = self.client.post_json(PING_URL, &headers, &payload).await?;

        let body: Value = response.json().await?;
        let signature = extract_addon_sig(&body)
            .ok_or_else(|| Error::ExtractionFailed("no addonSig in ping response".into()))?;

        *cached = Some((signature.clone(), Instant::now()));
        tracing::debug!("vavoo signature refreshed");
        Ok(signature)
    }

    async fn resolve_url(&self, url: &str, signature: &str) -> Result<String> {
        let payload = json!({
            "language": "de",
            "region": "AT",
            "url": url,
            "clientVersion": "3.1.21",
        });

        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "MediaHubMX/2".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert("mediahubmx-signature".to_string(), signature.to_string());

        let response = self.client.post_json(RESOLVE_URL, &headers, &payload).await?;

        let body: Value = response.json().await?;
        extract_resolved_url(&body)
            .ok_or_else(|| Error::ExtractionFailed("no URL in resolve response".into()))
    }
}

/// The signature arrives either at the top level or nested under `result`.
fn extract_addon_sig(body: &Value) -> Option<String> {
    if let Some(sig) = body.get("addonSig").and_then(Value::as_str) {
        return Some(sig.to_string());
    }
    body.get("result")?
        .get("addonSig")?
        .as_str()
        .map(str::to_string)
}

/// The resolve response is either an array of entries or a single object.
fn extract_resolved_url(body: &Value) -> Option<String> {
    match body {
        Value::Array(entries) => entries
            .first()?
            .get("url")?
            .as_str()
            .map(str::to_string),
        Value::Object(_) => body.get("url")?.as_str().map(str::to_string),
        _ => None,
    }
}

fn ping_payload(now_ms: i64) -> Value {
    json!({
        "token": "tosFwQCJMS8qrW_AjLoHPQ41646J5dRNha6ZWHnijoYQQQoADQoXYSo7ki7O5-CsgN4CH0uRk6EEoJ0728ar9scCRQW3ZkbfrPfeCXW2VgopSW2FWDqPOoVYIuVPAOnXCZ5g",
        "reason": "app-blur",
        "locale": "de",
        "theme": "dark",
        "metadata": {
            "device": {
                "type": "Handset",
                "brand": "google",
                "model": "Pixel",
                "name": "sdk_gphone64_arm64",
                "uniqueId": "d10e5d99ab665233",
            },
            "os": {
                "name": "android",
                "version": "13",
                "abis": ["arm64-v8a", "armeabi-v7a", "armeabi"],
                "host": "android",
            },
            "app": {
                "platform": "android",
                "version": "3.1.21",
                "buildId": "289515000",
                "engine": "hbc85",
                "signatures": ["6e8a975e3cbf07d5de823a760d4c2547f86c1403105020adee5de67ac510999e"],
                "installer": "app.revanced.manager.flutter",
            },
            "version": {
                "package": "tv.vavoo.app",
                "binary": "3.1.21",
                "js": "3.1.21",
            },
        },
        "appFocusTime": 0,
        "playerActive": false,
        "playDuration": 0,
        "devMode": false,
        "hasAddon": true,
        "castConnected": false,
        "package": "tv.vavoo.app",
        "version": "3.1.21",
        "process": "app",
        "firstAppStart": now_ms,
        "lastAppStart": now_ms,
        "ipLocation": "",
        "adblockEnabled": true,
        "proxy": {
            "supported": ["ss", "openvpn"],
            "engine": "ss",
            "ssVersion": 1,
            "enabled": true,
            "autoServer": true,
            "id": "de-fra",
        },
        "iap": { "supported": false },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_extract() {
        let e = VavooExtractor::new(Arc::new(RoutingClient::new(Vec::new(), Vec::new())));
        assert!(e.can_extract("https://vavoo.to/channel/123"));
        assert!(!e.can_extract("https://other.site/x"));
    }

    #[test]
    fn test_extract_addon_sig_top_level() {
        let body = json!({"addonSig": "abc123"});
        assert_eq!(extract_addon_sig(&body).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_extract_addon_sig_nested() {
        let body = json!({"result": {"addonSig": "nested"}});
        assert_eq!(extract_addon_sig(&body).as_deref(), Some("nested"));
    }

    #[test]
    fn test_extract_resolved_url_array_and_object() {
        let body = json!([{"url": "https://stream/1.m3u8"}]);
        assert_eq!(
            extract_resolved_url(&body).as_deref(),
            Some("https://stream/1.m3u8")
        );

        let body = json!({"url": "https://stream/2.m3u8"});
        assert_eq!(
            extract_resolved_url(&body).as_deref(),
            Some("https://stream/2.m3u8")
        );

        assert_eq!(extract_resolved_url(&json!([])), None);
    }
}
