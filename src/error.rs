use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to fetch URL: {url} - {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("Fetch timeout for URL: {0}")]
    FetchTimeout(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Invalid key length: expected 16 bytes")]
    InvalidKeyLength,

    #[error("Mismatched key_id/key count: {kids} vs {keys}")]
    MismatchedKeyCount { kids: usize, keys: usize },

    #[error("Unauthorized: invalid API password")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Recording is not active: {0}")]
    RecordingNotActive(String),

    #[error("Manifest parse failed: {0}")]
    ManifestParse(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Remux failed: {0}")]
    RemuxFailed(String),

    #[error("Subprocess error: {0}")]
    Subprocess(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl Error {
    fn error_code(&self) -> &'static str {
        match self {
            Self::FetchFailed { .. } => "FETCH_FAILED",
            Self::FetchTimeout(_) => "FETCH_TIMEOUT",
            Self::InvalidUrl(_) => "INVALID_URL",
            Self::MissingParameter(_) => "MISSING_PARAMETER",
            Self::InvalidKeyFormat(_) => "INVALID_KEY_FORMAT",
            Self::InvalidKeyLength => "INVALID_KEY_LENGTH",
            Self::MismatchedKeyCount { .. } => "MISMATCHED_KEY_COUNT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RecordingNotActive(_) => "RECORDING_NOT_ACTIVE",
            Self::ManifestParse(_) => "MANIFEST_PARSE",
            Self::ExtractionFailed(_) => "EXTRACTION_FAILED",
            Self::DecryptionFailed(_) => "DECRYPTION_FAILED",
            Self::RemuxFailed(_) => "REMUX_FAILED",
            Self::Subprocess(_) => "SUBPROCESS",
            Self::NotImplemented(_) => "NOT_IMPLEMENTED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::FetchFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::FetchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidUrl(_) | Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RecordingNotActive(_) => StatusCode::CONFLICT,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::InvalidKeyFormat(_)
            | Self::InvalidKeyLength
            | Self::MismatchedKeyCount { .. }
            | Self::ManifestParse(_)
            | Self::ExtractionFailed(_)
            | Self::DecryptionFailed(_)
            | Self::RemuxFailed(_)
            | Self::Subprocess(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::FetchTimeout(e.url().map(|u| u.to_string()).unwrap_or_default())
        } else {
            Self::FetchFailed {
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: e.to_string(),
            }
        }
    }
}

impl From<rquest::Error> for Error {
    fn from(e: rquest::Error) -> Self {
        if e.is_timeout() {
            Self::FetchTimeout(e.url().map(|u| u.to_string()).unwrap_or_default())
        } else {
            Self::FetchFailed {
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: e.to_string(),
            }
        }
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Self::InvalidKeyFormat(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
