//! CENC decrypt + remux endpoint.
//!
//! Fetches init and media in parallel, optionally decrypts, then remuxes the
//! concatenated fMP4 to MPEG-TS. Decryption failure is never fatal: the raw
//! concatenation goes to the remuxer instead.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::collections::HashMap;

use crate::{
    decrypt::{ClearKeySet, Mp4Decrypter},
    proxy::{decode_header_params, filter_forward_headers},
    server::state::AppState,
    urlutil, Error, Result,
};

const ZERO_KEY_ID: &str = "00000000000000000000000000000000";

/// GET /decrypt/segment.ts — decrypt and remux to MPEG-TS.
pub async fn decrypt_segment_ts(
    state: State<AppState>,
    query: Query<HashMap<String, String>>,
) -> Result<Response> {
    decrypt_segment(state, query, true).await
}

/// GET /decrypt/segment.mp4 — decrypt only, no remux.
pub async fn decrypt_segment_mp4(
    state: State<AppState>,
    query: Query<HashMap<String, String>>,
) -> Result<Response> {
    decrypt_segment(state, query, false).await
}

async fn decrypt_segment(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    remux: bool,
) -> Result<Response> {
    let segment_url = query
        .get("url")
        .cloned()
        .ok_or(Error::MissingParameter("url"))?;
    let init_url = query.get("init_url").cloned().filter(|u| !u.is_empty());
    let key_id = query.get("key_id").cloned().unwrap_or_default();
    let key = query.get("key").cloned().unwrap_or_default();
    let skip_decrypt = query.get("skip_decrypt").map(String::as_str) == Some("1");

    let mut headers = filter_forward_headers(&decode_header_params(&query));
    // Many CDNs reject segment fetches without a referer.
    if !headers.contains_key("Referer") {
        let origin = urlutil::scheme_host(&segment_url);
        if !origin.is_empty() {
            headers.insert("Referer".to_string(), format!("{origin}/"));
        }
    }

    tracing::debug!(
        segment_url = %segment_url,
        init_url = ?init_url,
        skip_decrypt,
        "decrypt segment request"
    );

    let (init_content, media_content) =
        fetch_init_and_media(&state, init_url.as_deref(), &segment_url, &headers).await?;

    let combined = if skip_decrypt || key_id == ZERO_KEY_ID {
        concat(&init_content, &media_content)
    } else if !key_id.is_empty() && !key.is_empty() {
        // A malformed pairing is a caller bug and surfaces as an error;
        // a decryption failure degrades to the raw bytes.
        let keys = ClearKeySet::parse_split(&key_id, &key)?;
        let raw = concat(&init_content, &media_content);
        match Mp4Decrypter::new(keys).decrypt_segment(&raw) {
            Ok(decrypted) => {
                tracing::debug!(output_size = decrypted.len(), "decryption successful");
                Bytes::from(decrypted)
            }
            Err(err) => {
                tracing::warn!(%err, "decryption failed, serving raw segment");
                raw
            }
        }
    } else {
        concat(&init_content, &media_content)
    };

    if !remux {
        return Ok(fmp4_response(combined));
    }

    match state.remuxer.remux_to_ts(combined.clone()).await {
        Ok(ts) => Ok((
            [
                (header::CONTENT_TYPE, "video/MP2T"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            ts,
        )
            .into_response()),
        Err(err) => {
            tracing::warn!(%err, "remux failed, serving raw fMP4");
            Ok(fmp4_response(combined))
        }
    }
}

fn fmp4_response(body: Bytes) -> Response {
    (
        [
            (header::CONTENT_TYPE, "video/mp4"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}

fn concat(init: &Bytes, media: &Bytes) -> Bytes {
    if init.is_empty() {
        return media.clone();
    }
    let mut out = Vec::with_capacity(init.len() + media.len());
    out.extend_from_slice(init);
    out.extend_from_slice(media);
    Bytes::from(out)
}

/// Fetch init (cached) and media concurrently. Init failure is non-fatal;
/// media failure surfaces as an upstream error.
async fn fetch_init_and_media(
    state: &AppState,
    init_url: Option<&str>,
    segment_url: &str,
    headers: &HashMap<String, String>,
) -> Result<(Bytes, Bytes)> {
    let init_fut = async {
        match init_url {
            Some(init_url) => {
                state
                    .init_cache
                    .get_or_fetch(init_url, headers, &state.client)
                    .await
            }
            None => Ok(Bytes::new()),
        }
    };
    let media_fut = state.client.fetch_bytes(segment_url, headers);

    let (init_result, media_result) = tokio::join!(init_fut, media_fut);

    let init = match init_result {
        Ok(init) => init,
        Err(err) => {
            tracing::warn!(%err, "init segment fetch failed, continuing without it");
            Bytes::new()
        }
    };

    Ok((init, media_result?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat() {
        let init = Bytes::from_static(b"init");
        let media = Bytes::from_static(b"media");
        assert_eq!(concat(&init, &media), Bytes::from_static(b"initmedia"));
        assert_eq!(concat(&Bytes::new(), &media), media);
    }
}
