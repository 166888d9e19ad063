//! Error kinds shared across the bridge, per §7 of the design.
//!
//! Each variant tags one of the five recovery strategies described there: `NotFound` and
//! `Permanent` are swallowed close to where they occur, `Auth` triggers a token refresh in the
//! bridge-account path, `Transient` drives dispatcher retries, and `Fatal` aborts startup.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Error type used throughout the bridge.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Record or actor absent; recoverable, often mapped to 404 or `None`.
    #[error("not found")]
    NotFound,
    /// Signature or token invalid.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Network/IO/5xx; caller should retry.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Malformed activity, oversized blob, disallowed host; dropped, no retry.
    #[error("permanent failure: {0}")]
    Permanent(String),
    /// Migration failure, bad config, database corruption; aborts startup.
    #[error("fatal: {0}")]
    Fatal(String),
    /// Request limit was reached while dereferencing a remote object.
    #[error("request limit reached during fetch")]
    RequestLimit,
    /// Object to be fetched was deleted (HTTP 410).
    #[error("object was deleted")]
    ObjectDeleted,
    /// A URL failed the domain/scheme checks in [`crate::config`].
    #[error("URL failed verification: {0}")]
    UrlVerification(&'static str),
    /// Incoming activity has an invalid body digest.
    #[error("invalid body digest")]
    BodyDigestInvalid,
    /// Incoming activity has an invalid HTTP signature.
    #[error("invalid HTTP signature")]
    SignatureInvalid,
    /// Failed to resolve an actor via webfinger.
    #[error("webfinger resolution failed")]
    WebfingerResolveFailed,
    /// Database error, passed through from sqlx.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// Catch-all for errors we don't classify further.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn other<T: Into<anyhow::Error>>(error: T) -> Self {
        Error::Other(error.into())
    }

    pub(crate) fn permanent<T: std::fmt::Display>(msg: T) -> Self {
        Error::Permanent(msg.to_string())
    }

    pub(crate) fn transient<T: std::fmt::Display>(msg: T) -> Self {
        Error::Transient(msg.to_string())
    }

    /// True when the sender of an inbox activity should not retry (2xx is returned).
    pub(crate) fn is_no_retry(&self) -> bool {
        matches!(
            self,
            Error::NotFound | Error::Permanent(_) | Error::WebfingerResolveFailed
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::permanent(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::permanent(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::transient(e)
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(e: reqwest_middleware::Error) -> Self {
        Error::transient(e)
    }
}

/// Maps error kinds onto the HTTP status codes described in §7.
///
/// Activity-level failures (`NotFound`, `Permanent`) return 2xx so the sending server does not
/// retry; only `Auth`/signature failures and genuine transient/database errors propagate as
/// 401/5xx.
impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            Error::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Error::Auth(_) | Error::SignatureInvalid | Error::BodyDigestInvalid => {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
            Error::Permanent(_) | Error::WebfingerResolveFailed | Error::RequestLimit => {
                (StatusCode::BAD_REQUEST, "permanent")
            }
            Error::Transient(_) | Error::Database(_) | Error::Other(_) | Error::ObjectDeleted => {
                (StatusCode::INTERNAL_SERVER_ERROR, "transient")
            }
            Error::UrlVerification(_) => (StatusCode::BAD_REQUEST, "url_verification"),
            Error::Fatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "fatal"),
        };
        (status, Json(json!({ "error": code, "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retry_kinds_are_swallowed() {
        assert!(Error::NotFound.is_no_retry());
        assert!(Error::permanent("bad record").is_no_retry());
        assert!(Error::WebfingerResolveFailed.is_no_retry());
    }

    #[test]
    fn retryable_kinds_are_not_swallowed() {
        assert!(!Error::transient("PDS returned 503").is_no_retry());
        assert!(!Error::Auth("ExpiredToken".to_string()).is_no_retry());
        assert!(!Error::Fatal("bad config".to_string()).is_no_retry());
    }

    #[test]
    fn auth_failures_map_to_401() {
        let response = Error::SignatureInvalid.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn permanent_failures_map_to_400() {
        let response = Error::permanent("malformed activity").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn transient_failures_map_to_500() {
        let response = Error::transient("PDS unreachable").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
