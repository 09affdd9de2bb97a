//! URL manipulation that preserves original percent-encoding.
//!
//! `url::Url::join` re-encodes path characters, which breaks CDNs that embed
//! parentheses, brackets or pre-encoded literals in segment paths. Resolution
//! here is plain string manipulation on the base path.

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(url: &str, base_url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }

    // Base directory: strip query string and the last path segment.
    let mut base = base_url;
    if let Some(idx) = base.find('?') {
        if idx > 0 {
            base = &base[..idx];
        }
    }
    let base_dir = match base.rfind('/') {
        Some(idx) if idx > 0 => &base[..idx + 1],
        _ => base,
    };

    if url.starts_with('/') {
        // Absolute path: combine with scheme+host from the base.
        let origin = scheme_host(base_url);
        if !origin.is_empty() {
            return format!("{origin}{url}");
        }
        return format!("{base_dir}{url}");
    }

    if url.starts_with("../") {
        let mut result = base_dir.to_string();
        let mut remaining = url;
        while let Some(rest) = remaining.strip_prefix("../") {
            remaining = rest;
            let trimmed = result.trim_end_matches('/');
            match trimmed.rfind('/') {
                Some(idx) if idx > 0 => result = trimmed[..idx + 1].to_string(),
                _ => {}
            }
        }
        return format!("{result}{remaining}");
    }

    format!("{base_dir}{url}")
}

/// Directory portion of a URL (without the filename), query stripped.
pub fn base_directory(url: &str) -> String {
    let mut url = url;
    if let Some(idx) = url.find('?') {
        if idx > 0 {
            url = &url[..idx];
        }
    }
    match url.rfind('/') {
        Some(idx) if idx > 0 => url[..idx + 1].to_string(),
        _ => url.to_string(),
    }
}

/// `scheme://host` of a URL, empty string when unparseable.
pub fn scheme_host(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => match parsed.port() {
                Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
                None => format!("{}://{}", parsed.scheme(), host),
            },
            None => String::new(),
        },
        Err(_) => String::new(),
    }
}
