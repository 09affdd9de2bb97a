//! Codec for carrying upstream headers as `h_<Name>` query parameters.
//!
//! Underscores in the parameter suffix map to hyphens in the header name
//! (`h_User_Agent` -> `User-Agent`). The reverse direction is lossy for
//! header names that genuinely contain underscores.

use std::collections::HashMap;

/// Hop-by-hop and identity-leaking headers never forwarded upstream.
const BLOCKED_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-real-ip",
    "forwarded",
    "via",
    "host",
    "connection",
    "accept-encoding",
];

/// Extract upstream headers from query parameters with the `h_` prefix.
/// Only the first value per key is taken.
pub fn decode_header_params(query: &HashMap<String, String>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for (key, value) in query {
        if let Some(name) = key.strip_prefix("h_") {
            headers.insert(name.replace('_', "-"), value.clone());
        }
    }
    headers
}

/// Encode a header map as `h_<name>` query pairs, hyphens becoming
/// underscores. Pairs are sorted for deterministic URLs.
pub fn encode_header_params(headers: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (format!("h_{}", k.replace('-', "_")), v.clone()))
        .collect();
    pairs.sort();
    pairs
}

/// Drop blocklisted headers before forwarding upstream.
pub fn filter_forward_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(k, _)| !BLOCKED_HEADERS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
