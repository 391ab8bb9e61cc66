//! CLI error types with miette diagnostics.
//!
//! Maps config and core errors into user-facing errors with help text.

use cloudpoll_api::{AuthError, FetchError};
use cloudpoll_config::ConfigError;
use cloudpoll_core::CoreError;
use miette::Diagnostic;
use thiserror::Error;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("No thing selected")]
    #[diagnostic(
        code(cloudpoll::no_thing),
        help(
            "Pass --thing, set CLOUDPOLL_THING, or set default_thing in {path}.\n\
             Configured things: {available}"
        )
    )]
    NoThing { path: String, available: String },

    #[error("Thing '{name}' not found in configuration")]
    #[diagnostic(
        code(cloudpoll::thing_not_found),
        help("Configured things: {available}")
    )]
    ThingNotFound { name: String, available: String },

    #[error("Unknown vendor '{vendor}'")]
    #[diagnostic(
        code(cloudpoll::unknown_vendor),
        help("Run: cloudpoll vendors to see the built-in profiles")
    )]
    UnknownVendor { vendor: String },

    #[error("No credentials configured for thing '{thing}'")]
    #[diagnostic(
        code(cloudpoll::no_credentials),
        help(
            "Set login + password (or password_env) for account vendors,\n\
             or token (or token_env) for token vendors."
        )
    )]
    NoCredentials { thing: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(cloudpoll::validation))]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    #[diagnostic(code(cloudpoll::config))]
    Config(String),

    // ── Vendor ───────────────────────────────────────────────────────
    #[error("Authentication failed: {reason}")]
    #[diagnostic(
        code(cloudpoll::auth_failed),
        help("Check the login and password (or token) configured for this thing.")
    )]
    AuthFailed { reason: String },

    #[error("Vendor request timed out")]
    #[diagnostic(
        code(cloudpoll::timeout),
        help("Raise `timeout` for the thing or check the vendor's service status.")
    )]
    Timeout,

    #[error("Vendor communication failed: {reason}")]
    #[diagnostic(code(cloudpoll::vendor))]
    Vendor { reason: String },

    #[error("Thing is {status}")]
    #[diagnostic(code(cloudpoll::offline))]
    NotOnline { status: String },

    // ── Commands ─────────────────────────────────────────────────────
    #[error("Channel '{channel}' does not accept commands")]
    #[diagnostic(code(cloudpoll::unknown_channel))]
    UnknownChannel { channel: String },

    #[error("{message}")]
    #[diagnostic(code(cloudpoll::unsupported))]
    Unsupported { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render TOML: {0}")]
    #[diagnostic(code(cloudpoll::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::ThingNotFound { .. } | Self::UnknownChannel { .. } => exit_code::NOT_FOUND,
            Self::NoThing { .. }
            | Self::UnknownVendor { .. }
            | Self::Validation { .. }
            | Self::Config(_) => exit_code::USAGE,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::Vendor { .. } | Self::NotOnline { .. } => exit_code::CONNECTION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Io(_) | Self::Toml(_) => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { thing } => Self::NoCredentials { thing },
            ConfigError::UnknownVendor { vendor, .. } => Self::UnknownVendor { vendor },
            ConfigError::UnknownThing { thing } => Self::ThingNotFound {
                name: thing,
                available: "(see: cloudpoll things)".into(),
            },
            ConfigError::Figment(e) => Self::Config(e.to_string()),
            ConfigError::Io(e) => Self::Io(e),
        }
    }
}

impl From<AuthError> for CliError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Timeout => Self::Timeout,
            AuthError::InvalidCredentials(reason) => Self::AuthFailed { reason },
            other => Self::Vendor {
                reason: other.reason(),
            },
        }
    }
}

impl From<FetchError> for CliError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Timeout => Self::Timeout,
            other => Self::Vendor {
                reason: other.reason(),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { message } => Self::Validation {
                field: "thing".into(),
                reason: message,
            },
            CoreError::Disposed => Self::NotOnline {
                status: "disposed".into(),
            },
            CoreError::UnknownChannel { channel } => Self::UnknownChannel { channel },
            CoreError::InvalidCommand { channel, reason } => Self::Validation {
                field: channel,
                reason,
            },
            CoreError::Unsupported { operation, vendor } => Self::Unsupported {
                message: format!("{operation} is not supported by vendor '{vendor}'"),
            },
            CoreError::Auth(e) => e.into(),
            CoreError::Fetch(e) => e.into(),
        }
    }
}
