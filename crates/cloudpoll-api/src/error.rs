use thiserror::Error;

use crate::extract::ExtractError;

/// Transport-level error type for the `cloudpoll-api` crate.
///
/// Every raw failure mode of talking to a vendor endpoint lands here first:
/// HTTP transport, timeouts, vendor envelopes, and body decoding. Callers
/// rarely match on it directly -- the [`AuthError`] and [`FetchError`]
/// conversions classify it into the small taxonomy the polling loop acts on.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (wrong credentials, account locked, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Session has expired (HTTP 401 or a vendor expiry marker).
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A configured header name or value is not valid HTTP.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    // ── Vendor API ──────────────────────────────────────────────────
    /// Non-success status reported by the vendor, either as an HTTP status
    /// or inside the response envelope (`{"status": 500}`, `{"code": 1}`).
    #[error("Vendor API error ({code}): {message}")]
    Vendor { code: String, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// An anchor-based extraction rule did not match the response body.
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractError),
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::SessionExpired)
    }

    /// Returns `true` if the request ran past its deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

// ── Classified errors ───────────────────────────────────────────────

/// Failure of a login, refresh, or session validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Timeout")]
    Timeout,

    #[error("Communication error: {0}")]
    CommunicationError(String),

    /// The vendor answered, but not with anything a session can be built from
    /// (malformed body, empty token, missing anchor).
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The vendor rejected the configured credentials, or none are usable.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

impl AuthError {
    /// Short reason suitable for a thing status detail.
    pub fn reason(&self) -> String {
        match self {
            Self::Timeout => "Timeout".into(),
            Self::CommunicationError(detail)
            | Self::InvalidResponse(detail)
            | Self::InvalidCredentials(detail) => detail.clone(),
        }
    }
}

impl From<Error> for AuthError {
    fn from(err: Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        match err {
            Error::Authentication { message } => Self::InvalidCredentials(message),
            Error::Deserialization { message, .. } => Self::InvalidResponse(message),
            Error::Extraction(e) => Self::InvalidResponse(e.to_string()),
            Error::Vendor { code, message } => {
                Self::InvalidResponse(format!("vendor error {code}: {message}"))
            }
            other => Self::CommunicationError(other.to_string()),
        }
    }
}

/// Failure of a status, list, or control request made with a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Timeout")]
    Timeout,

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The vendor signalled that the session is no longer accepted.
    /// Callers mark the session expired, re-authenticate, and retry once;
    /// it never reaches the host as a status reason.
    #[error("Session rejected by vendor")]
    Unauthorized,
}

impl FetchError {
    /// Short reason suitable for a thing status detail.
    pub fn reason(&self) -> String {
        match self {
            Self::Timeout => "Timeout".into(),
            Self::CommunicationError(detail) | Self::InvalidResponse(detail) => detail.clone(),
            Self::Unauthorized => "Session rejected".into(),
        }
    }
}

impl From<Error> for FetchError {
    fn from(err: Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        match err {
            Error::SessionExpired | Error::Authentication { .. } => Self::Unauthorized,
            Error::Deserialization { message, .. } => Self::InvalidResponse(message),
            Error::Extraction(e) => Self::InvalidResponse(e.to_string()),
            Error::Vendor { code, message } => {
                Self::InvalidResponse(format!("vendor error {code}: {message}"))
            }
            other => Self::CommunicationError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classifies_into_both_taxonomies() {
        let err = Error::Timeout { timeout_secs: 10 };
        assert!(err.is_transient());
        assert_eq!(AuthError::from(Error::Timeout { timeout_secs: 10 }), AuthError::Timeout);
        assert_eq!(FetchError::from(err), FetchError::Timeout);
    }

    #[test]
    fn expired_session_becomes_unauthorized() {
        assert_eq!(FetchError::from(Error::SessionExpired), FetchError::Unauthorized);
    }

    #[test]
    fn decoding_failures_are_invalid_responses() {
        let err = Error::Deserialization {
            message: "expected value".into(),
            body: "<html>".into(),
        };
        assert!(matches!(AuthError::from(err), AuthError::InvalidResponse(_)));
    }

    #[test]
    fn timeout_reason_is_stable() {
        assert_eq!(FetchError::Timeout.reason(), "Timeout");
        assert_eq!(AuthError::Timeout.reason(), "Timeout");
    }
}
