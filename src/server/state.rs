use std::sync::Arc;

use crate::{
    cache::InitSegmentCache, config::Config, flaresolverr::FlareSolverrClient,
    proxy::RoutingClient, recording::RecordingManager, remux::Remuxer, service::ProxyService,
    transcode::Transcoder,
};

/// Shared application state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: Arc<RoutingClient>,
    pub service: Arc<ProxyService>,
    pub recordings: Arc<RecordingManager>,
    pub transcoder: Arc<Transcoder>,
    pub init_cache: Arc<InitSegmentCache>,
    pub remuxer: Remuxer,
    pub flaresolverr: Arc<FlareSolverrClient>,
}
