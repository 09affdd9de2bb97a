//! API-password auth for the proxy surface.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::state::AppState;
use crate::Error;

/// Endpoints reachable without a password.
fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/" | "/info" | "/favicon.ico") || path.starts_with("/static/")
}

/// Accepts `api_password=<pw>`, `X-API-Password: <pw>` or
/// `Authorization: Bearer <pw>`.
fn password_matches(configured: &str, req: &Request) -> bool {
    if let Some(query) = req.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "api_password" && value == configured {
                return true;
            }
        }
    }

    if let Some(header) = req.headers().get("X-API-Password") {
        if header.to_str().ok() == Some(configured) {
            return true;
        }
    }

    if let Some(auth) = req.headers().get("Authorization") {
        if let Ok(auth) = auth.to_str() {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                if token == configured {
                    return true;
                }
            }
        }
    }

    false
}

pub async fn auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(configured) = state.config.api_password.as_deref() else {
        return next.run(req).await;
    };

    if is_public_endpoint(req.uri().path()) || password_matches(configured, &req) {
        return next.run(req).await;
    }

    tracing::warn!(path = req.uri().path(), "unauthorized request");
    Error::Unauthorized.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        for (key, value) in headers {
            builder = builder.header(*key, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_public_endpoints() {
        assert!(is_public_endpoint("/"));
        assert!(is_public_endpoint("/info"));
        assert!(is_public_endpoint("/favicon.ico"));
        assert!(is_public_endpoint("/static/app.css"));
        assert!(!is_public_endpoint("/proxy/manifest.m3u8"));
        assert!(!is_public_endpoint("/api/recordings"));
    }

    #[test]
    fn test_password_via_query() {
        let req = request("/proxy/manifest.m3u8?url=x&api_password=secret", &[]);
        assert!(password_matches("secret", &req));

        let req = request("/proxy/manifest.m3u8?url=x&api_password=wrong", &[]);
        assert!(!password_matches("secret", &req));
    }

    #[test]
    fn test_password_via_header() {
        let req = request("/x", &[("X-API-Password", "secret")]);
        assert!(password_matches("secret", &req));
    }

    #[test]
    fn test_password_via_bearer() {
        let req = request("/x", &[("Authorization", "Bearer secret")]);
        assert!(password_matches("secret", &req));

        let req = request("/x", &[("Authorization", "Basic secret")]);
        assert!(!password_matches("secret", &req));
    }

    #[test]
    fn test_missing_password() {
        let req = request("/x", &[]);
        assert!(!password_matches("secret", &req));
    }
}
