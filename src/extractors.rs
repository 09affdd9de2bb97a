//! Site extractors resolve hosting-platform URLs to direct manifest URLs
//! plus whatever headers the upstream requires.

pub mod vavoo;

pub use vavoo::VavooExtractor;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{
    proxy::RoutingClient,
    types::{
        ExtractResult, ENDPOINT_HLS_MANIFEST, ENDPOINT_MPD_MANIFEST, ENDPOINT_PROXY_STREAM,
    },
    urlutil, Result,
};

const EXTRACTOR_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One of the closed set of extractors.
pub enum Extractor {
    Generic(GenericExtractor),
    Vavoo(VavooExtractor),
}

impl Extractor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic(_) => "generic",
            Self::Vavoo(_) => "vavoo",
        }
    }

    pub fn can_extract(&self, url: &str) -> bool {
        match self {
            Self::Generic(_) => false, // fallback only
            Self::Vavoo(e) => e.can_extract(url),
        }
    }

    pub async fn extract(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<ExtractResult> {
        match self {
            Self::Generic(e) => e.extract(url, headers),
            Self::Vavoo(e) => e.extract(url).await,
        }
    }
}

/// First-match-wins extractor table with a generic fallback.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: RwLock<Vec<Arc<Extractor>>>,
    fallback: RwLock<Option<Arc<Extractor>>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, extractor: Arc<Extractor>) {
        self.extractors.write().unwrap().push(extractor);
    }

    pub fn set_fallback(&self, extractor: Arc<Extractor>) {
        *self.fallback.write().unwrap() = Some(extractor);
    }

    pub fn get(&self, url: &str) -> Option<Arc<Extractor>> {
        let extractors = self.extractors.read().unwrap();
        for extractor in extractors.iter() {
            if extractor.can_extract(url) {
                return Some(extractor.clone());
            }
        }
        self.fallback.read().unwrap().clone()
    }

    /// A non-fallback extractor claiming this URL, if any.
    pub fn get_site_extractor(&self, url: &str) -> Option<Arc<Extractor>> {
        let extractors = self.extractors.read().unwrap();
        extractors
            .iter()
            .find(|e| e.can_extract(url))
            .cloned()
    }
}

/// Fallback extractor: returns the URL unchanged with origin-derived
/// headers, picking the endpoint from the URL shape. Idempotent.
#[derive(Default)]
pub struct GenericExtractor;

impl GenericExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(
        &self,
        url: &str,
        extra_headers: &HashMap<String, String>,
    ) -> Result<ExtractResult> {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), EXTRACTOR_USER_AGENT.to_string());

        let origin = urlutil::scheme_host(url);
        if !origin.is_empty() {
            headers.insert("Referer".to_string(), format!("{origin}/"));
            headers.insert("Origin".to_string(), origin);
        }

        for (key, value) in extra_headers {
            headers.insert(key.clone(), value.clone());
        }

        let endpoint = if url.contains(".mpd") {
            ENDPOINT_MPD_MANIFEST
        } else if url.contains(".m3u8") {
            ENDPOINT_HLS_MANIFEST
        } else {
            ENDPOINT_PROXY_STREAM
        };

        Ok(ExtractResult {
            destination_url: url.to_string(),
            request_headers: headers,
            endpoint: endpoint.to_string(),
            proxy_url: None,
        })
    }
}

/// Wire up the default extractor set.
pub fn default_registry(client: Arc<RoutingClient>) -> ExtractorRegistry {
    let registry = ExtractorRegistry::new();
    registry.register(Arc::new(Extractor::Vavoo(VavooExtractor::new(client))));
    registry.set_fallback(Arc::new(Extractor::Generic(GenericExtractor::new())));
    registry
}
