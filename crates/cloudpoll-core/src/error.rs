// ── Core error types ──
//
// Host-facing errors from cloudpoll-core. Transport failures arrive already
// classified as `AuthError` / `FetchError` by cloudpoll-api; this module adds
// the field-local mapping error, the discovery error, and the umbrella
// `CoreError` returned by handler entry points.

use cloudpoll_api::{AuthError, FetchError};
use thiserror::Error;

use crate::model::ChannelKind;

/// A single field could not be converted to its channel type.
///
/// Never escapes a mapping pass: the mapper logs it and skips the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("field '{field}': expected {expected}, found {found}")]
    FieldParseFailure {
        field: String,
        expected: ChannelKind,
        found: String,
    },
}

/// Failure of a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The owning thing is not online; the scan is rescheduled, not reported.
    #[error("Bridge is offline")]
    BridgeOffline,

    #[error("Communication error: {0}")]
    CommunicationError(String),
}

impl From<FetchError> for DiscoveryError {
    fn from(err: FetchError) -> Self {
        Self::CommunicationError(err.reason())
    }
}

impl From<AuthError> for DiscoveryError {
    fn from(err: AuthError) -> Self {
        Self::CommunicationError(err.reason())
    }
}

impl From<PollError> for DiscoveryError {
    fn from(err: PollError) -> Self {
        Self::CommunicationError(err.reason())
    }
}

/// Outcome of a failed poll tick, before it becomes a thing status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The vendor answered, but reports the device itself as unreachable
    /// or in service mode.
    #[error("Device offline: {0}")]
    DeviceOffline(String),
}

impl PollError {
    /// Short reason shown in the thing status.
    pub fn reason(&self) -> String {
        match self {
            Self::Auth(e) => e.reason(),
            Self::Fetch(e) => e.reason(),
            Self::DeviceOffline(reason) => reason.clone(),
        }
    }

    /// Failures that will not clear up until the configuration changes.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Auth(AuthError::InvalidCredentials(_)))
    }
}

/// Unified error type for handler entry points.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Thing has been disposed")]
    Disposed,

    // ── Command errors ───────────────────────────────────────────────
    #[error("Unknown channel: {channel}")]
    UnknownChannel { channel: String },

    #[error("Invalid command for channel {channel}: {reason}")]
    InvalidCommand { channel: String, reason: String },

    #[error("Operation not supported: {operation} (vendor {vendor})")]
    Unsupported { operation: String, vendor: String },

    // ── Vendor errors (already classified) ───────────────────────────
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl From<PollError> for CoreError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Auth(e) => CoreError::Auth(e),
            PollError::Fetch(e) => CoreError::Fetch(e),
            PollError::DeviceOffline(reason) => {
                CoreError::Fetch(FetchError::CommunicationError(reason))
            }
        }
    }
}

impl From<cloudpoll_api::Error> for CoreError {
    fn from(err: cloudpoll_api::Error) -> Self {
        match err {
            cloudpoll_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            cloudpoll_api::Error::InvalidHeader(h) => CoreError::Config {
                message: format!("Invalid header: {h}"),
            },
            cloudpoll_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            other => CoreError::Fetch(FetchError::from(other)),
        }
    }
}
