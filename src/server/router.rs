use axum::{
    http::Method,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::{
    handlers::{decrypt, misc, proxy, recordings},
    middleware::auth,
    state::AppState,
};
use crate::{
    cache::InitSegmentCache,
    config::Config,
    extractors,
    flaresolverr::FlareSolverrClient,
    proxy::RoutingClient,
    recording::RecordingManager,
    remux::Remuxer,
    service::ProxyService,
    stream::{GenericHandler, HlsHandler, MpdHandler, StreamHandler, StreamHandlerRegistry},
    transcode::Transcoder,
    Result,
};

/// Wire up all components and build the application router.
pub async fn create_app(config: Config) -> Result<(Router, AppState)> {
    let config = Arc::new(config);
    let base_url = config.base_url.trim_end_matches('/').to_string();

    let client = Arc::new(RoutingClient::new(
        config.transport_routes.clone(),
        config.global_proxies.clone(),
    ));

    let stream_handlers = Arc::new(StreamHandlerRegistry::new());
    stream_handlers.register(Arc::new(StreamHandler::Hls(HlsHandler::new(
        client.clone(),
        base_url.clone(),
    ))));
    stream_handlers.register(Arc::new(StreamHandler::Mpd(MpdHandler::new(
        client.clone(),
        base_url.clone(),
    ))));
    stream_handlers.register(Arc::new(StreamHandler::Generic(GenericHandler::new(
        client.clone(),
    ))));
    stream_handlers.set_fallback(Arc::new(StreamHandler::Generic(GenericHandler::new(
        client.clone(),
    ))));

    let extractor_registry = Arc::new(extractors::default_registry(client.clone()));

    let service = Arc::new(ProxyService::new(
        stream_handlers,
        extractor_registry,
        base_url.clone(),
    ));

    let recordings = RecordingManager::new(&config, base_url.clone()).await?;
    let transcoder = Transcoder::new(&config).await?;

    let state = AppState {
        client,
        service,
        recordings,
        transcoder,
        init_cache: Arc::new(InitSegmentCache::default()),
        remuxer: Remuxer::new(config.ffmpeg_path.clone()),
        flaresolverr: Arc::new(FlareSolverrClient::new(
            config.flaresolverr_url.clone(),
            config.flaresolverr_timeout,
        )),
        config,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let app = Router::new()
        // Public surface
        .route("/", get(misc::index))
        .route("/info", get(misc::info))
        .route("/api/info", get(misc::api_info))
        .route("/favicon.ico", get(misc::favicon))
        .route("/proxy/ip", get(misc::public_ip))
        // Proxy surface
        .route("/proxy/manifest.m3u8", get(proxy::proxy_manifest))
        .route("/proxy/hls/manifest.m3u8", get(proxy::proxy_manifest))
        .route("/proxy/mpd/manifest.m3u8", get(proxy::proxy_manifest))
        .route("/proxy/stream", get(proxy::proxy_stream))
        .route("/proxy/hls/segment.ts", get(proxy::proxy_stream))
        .route("/proxy/hls/segment.m4s", get(proxy::proxy_stream))
        .route("/proxy/hls/segment.mp4", get(proxy::proxy_stream))
        .route("/segment/{filename}", get(proxy::segment))
        .route("/decrypt/segment.ts", get(decrypt::decrypt_segment_ts))
        .route("/decrypt/segment.mp4", get(decrypt::decrypt_segment_mp4))
        // Extraction and keys
        .route("/extractor", get(misc::extract))
        .route("/extractor/video", get(misc::extract))
        .route("/license", get(misc::license).post(misc::license))
        .route("/key", get(misc::key))
        .route("/ffmpeg_stream/{stream_id}/{filename}", get(misc::ffmpeg_stream))
        // DVR surface
        .route("/api/recordings", get(recordings::list))
        .route("/api/recordings/active", get(recordings::list_active))
        .route("/api/recordings/start", post(recordings::start))
        .route("/api/recordings/all", delete(recordings::delete_all))
        .route(
            "/api/recordings/{id}",
            get(recordings::get).delete(recordings::delete),
        )
        .route("/api/recordings/{id}/stop", post(recordings::stop))
        .route("/api/recordings/{id}/stream", get(recordings::stream))
        .route("/api/recordings/{id}/download", get(recordings::download))
        .route("/api/recordings/{id}/delete", get(recordings::delete_get))
        .route("/record", get(recordings::record))
        .route("/record/stop/{id}", get(recordings::stop_and_stream))
        // Addon surface is out of scope here
        .route("/stremio", get(misc::not_implemented))
        .route("/stremio/{*rest}", get(misc::not_implemented))
        .layer(middleware::from_fn_with_state(state.clone(), auth))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    Ok((app, state))
}
