//! Stream handlers and the dispatch registry.

pub mod generic;
pub mod hls;
pub mod mpd;

pub use generic::GenericHandler;
pub use hls::HlsHandler;
pub use mpd::MpdHandler;

use crate::{
    types::{StreamRequest, StreamResponse, StreamType},
    Result,
};
use std::sync::{Arc, RwLock};

/// A stream handler: one of a closed set of manifest processors.
pub enum StreamHandler {
    Hls(HlsHandler),
    Mpd(MpdHandler),
    Generic(GenericHandler),
}

impl StreamHandler {
    pub fn kind(&self) -> StreamType {
        match self {
            Self::Hls(_) => StreamType::Hls,
            Self::Mpd(_) => StreamType::Mpd,
            Self::Generic(_) => StreamType::Generic,
        }
    }

    pub fn can_handle(&self, url: &str) -> bool {
        match self {
            Self::Hls(h) => h.can_handle(url),
            Self::Mpd(h) => h.can_handle(url),
            Self::Generic(h) => h.can_handle(url),
        }
    }

    pub async fn handle_manifest(&self, req: &StreamRequest) -> Result<StreamResponse> {
        match self {
            Self::Hls(h) => h.handle_manifest(req).await,
            Self::Mpd(h) => h.handle_manifest(req).await,
            Self::Generic(h) => h.handle_segment(req).await,
        }
    }

    pub async fn handle_segment(&self, req: &StreamRequest) -> Result<StreamResponse> {
        match self {
            Self::Hls(h) => h.handle_segment(req).await,
            Self::Mpd(h) => h.handle_segment(req).await,
            Self::Generic(h) => h.handle_segment(req).await,
        }
    }
}

/// First-match-wins handler table with a fallback slot.
#[derive(Default)]
pub struct StreamHandlerRegistry {
    handlers: RwLock<Vec<Arc<StreamHandler>>>,
    fallback: RwLock<Option<Arc<StreamHandler>>>,
}

impl StreamHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<StreamHandler>) {
        self.handlers.write().unwrap().push(handler);
    }

    pub fn set_fallback(&self, handler: Arc<StreamHandler>) {
        *self.fallback.write().unwrap() = Some(handler);
    }

    /// First handler whose `can_handle` matches, else the fallback.
    pub fn get(&self, url: &str) -> Option<Arc<StreamHandler>> {
        let handlers = self.handlers.read().unwrap();
        for handler in handlers.iter() {
            if handler.can_handle(url) {
                return Some(handler.clone());
            }
        }
        self.fallback.read().unwrap().clone()
    }

    pub fn get_by_type(&self, kind: StreamType) -> Option<Arc<StreamHandler>> {
        let handlers = self.handlers.read().unwrap();
        for handler in handlers.iter() {
            if handler.kind() == kind {
                return Some(handler.clone());
            }
        }
        self.fallback.read().unwrap().clone()
    }
}
