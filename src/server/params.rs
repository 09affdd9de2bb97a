//! Query-string parsing for the proxy endpoints.
//!
//! The `h_*` header parameters are open-ended, so endpoints take the raw
//! query map rather than a fixed struct.

use std::collections::HashMap;

use crate::{
    proxy::{decode_header_params, filter_forward_headers},
    types::StreamRequest,
};

/// Build a StreamRequest from the query parameters of a proxy endpoint.
pub fn parse_stream_request(query: &HashMap<String, String>) -> StreamRequest {
    let url = query
        .get("url")
        .or_else(|| query.get("d"))
        .cloned()
        .unwrap_or_default();

    let key_id = query.get("key_id").cloned().filter(|s| !s.is_empty());
    let key = query.get("key").cloned().filter(|s| !s.is_empty());

    // clearkey may arrive combined or as separate key_id/key lists.
    let mut clear_key = query.get("clearkey").cloned().filter(|s| !s.is_empty());
    if clear_key.is_none() {
        if let (Some(key_id), Some(key)) = (key_id.as_deref(), key.as_deref()) {
            let kids: Vec<&str> = key_id.split(',').map(str::trim).collect();
            let keys: Vec<&str> = key.split(',').map(str::trim).collect();
            if kids.len() == keys.len() {
                clear_key = Some(
                    kids.iter()
                        .zip(&keys)
                        .map(|(kid, key)| format!("{kid}:{key}"))
                        .collect::<Vec<_>>()
                        .join(","),
                );
            }
        }
    }

    StreamRequest {
        url,
        headers: filter_forward_headers(&decode_header_params(query)),
        clear_key,
        key_id,
        key,
        redirect_stream: query.get("redirect_stream").map(String::as_str) == Some("true"),
        force: query.get("force").map(String::as_str) == Some("true"),
        extension: query.get("ext").cloned().filter(|s| !s.is_empty()),
        rep_id: query.get("rep_id").cloned().filter(|s| !s.is_empty()),
        no_bypass: query.get("no_bypass").map(String::as_str) == Some("1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_basic() {
        let req = parse_stream_request(&query(&[
            ("url", "https://x/m.m3u8"),
            ("no_bypass", "1"),
            ("force", "true"),
            ("rep_id", "v2"),
        ]));
        assert_eq!(req.url, "https://x/m.m3u8");
        assert!(req.no_bypass);
        assert!(req.force);
        assert!(!req.redirect_stream);
        assert_eq!(req.rep_id.as_deref(), Some("v2"));
    }

    #[test]
    fn test_parse_d_alias() {
        let req = parse_stream_request(&query(&[("d", "https://x/m.m3u8")]));
        assert_eq!(req.url, "https://x/m.m3u8");

        // url wins over d when both are present
        let req = parse_stream_request(&query(&[("url", "https://a/"), ("d", "https://b/")]));
        assert_eq!(req.url, "https://a/");
    }

    #[test]
    fn test_parse_headers_decoded_and_filtered() {
        let req = parse_stream_request(&query(&[
            ("url", "https://x/"),
            ("h_Referer", "https://origin/"),
            ("h_User_Agent", "agent"),
            ("h_X_Forwarded_For", "1.2.3.4"),
        ]));
        assert_eq!(req.headers.get("Referer").unwrap(), "https://origin/");
        assert_eq!(req.headers.get("User-Agent").unwrap(), "agent");
        assert!(!req.headers.contains_key("X-Forwarded-For"));
    }

    #[test]
    fn test_parse_clearkey_combined() {
        let req = parse_stream_request(&query(&[("url", "u"), ("clearkey", "kid:key")]));
        assert_eq!(req.clear_key.as_deref(), Some("kid:key"));
    }

    #[test]
    fn test_parse_clearkey_from_split_params() {
        let req = parse_stream_request(&query(&[
            ("url", "u"),
            ("key_id", "kid1,kid2"),
            ("key", "key1,key2"),
        ]));
        assert_eq!(req.clear_key.as_deref(), Some("kid1:key1,kid2:key2"));
    }

    #[test]
    fn test_parse_clearkey_split_mismatch_ignored() {
        let req = parse_stream_request(&query(&[
            ("url", "u"),
            ("key_id", "kid1,kid2"),
            ("key", "key1"),
        ]));
        assert_eq!(req.clear_key, None);
        assert_eq!(req.key_id.as_deref(), Some("kid1,kid2"));
    }
}
