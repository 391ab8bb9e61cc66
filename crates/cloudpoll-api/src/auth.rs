// Authentication schemes
//
// Vendors differ in how they log in, where the token comes back, and where
// it has to go on later requests. Those differences are plain data here;
// the login/refresh/logout logic in `login.rs` interprets them.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::envelope::{BodyEncoding, FieldMatch, Method, StatusCheck, lookup};
use crate::extract::ExtractionRule;
use crate::session::ExpiryHint;

/// Credentials configured for one account.
#[derive(Debug, Clone)]
pub enum Credentials {
    Password {
        login: String,
        password: SecretString,
    },
    /// A long-lived application token (no login endpoint).
    Token(SecretString),
}

impl Credentials {
    pub fn password(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            login: login.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(SecretString::from(token.into()))
    }

    /// Identifier used for the session and log lines. Never the secret.
    pub fn account_id(&self) -> &str {
        match self {
            Self::Password { login, .. } => login,
            Self::Token(_) => "token",
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::Password { login, password } => {
                login.trim().is_empty() || password.expose_secret().is_empty()
            }
            Self::Token(token) => token.expose_secret().trim().is_empty(),
        }
    }
}

/// Where the access token is found in a login or refresh response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Dotted JSON path (`access_token`, `data.token`).
    JsonField(&'static str),
    /// Response header.
    Header(&'static str),
    /// The session lives in the cookie jar; nothing to extract.
    Cookie,
    /// Anchor-based extraction from an HTML body.
    Anchor(ExtractionRule),
}

/// Where the access token goes on authenticated requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPlacement {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// Raw token in the named header.
    Header(&'static str),
    /// The named header with `template` rendered against the session
    /// (see [`Session::render`](crate::session::Session::render)).
    HeaderTemplate {
        name: &'static str,
        template: &'static str,
    },
    /// `?<name>=<token>`
    Query(&'static str),
    /// Cookies set at login are sent by the client's jar.
    CookieJar,
}

/// How long a fresh session stays usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryPolicy {
    Never,
    Ttl(Duration),
    /// Seconds-until-expiry field in the grant body (OAuth `expires_in`).
    FromField(&'static str),
    /// Forced re-login at the next full wall-clock hour.
    HourBoundary,
}

impl ExpiryPolicy {
    pub fn hint(&self, now: DateTime<Utc>, body: Option<&Value>) -> ExpiryHint {
        match self {
            Self::Never => ExpiryHint::Never,
            Self::Ttl(ttl) => TimeDelta::from_std(*ttl)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .map_or(ExpiryHint::Never, ExpiryHint::At),
            Self::FromField(path) => body
                .and_then(|b| lookup(b, path))
                .and_then(Value::as_i64)
                .and_then(|secs| now.checked_add_signed(TimeDelta::seconds(secs)))
                .map_or(ExpiryHint::Never, ExpiryHint::At),
            Self::HourBoundary => {
                let secs = now.timestamp();
                DateTime::from_timestamp(secs - secs.rem_euclid(3600) + 3600, 0)
                    .map_or(ExpiryHint::Never, ExpiryHint::At)
            }
        }
    }
}

/// Token-bearing parts of a login or refresh response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantSource {
    pub token: TokenSource,
    pub refresh_token: Option<&'static str>,
    /// `(session extra key, JSON path)` pairs, e.g. `("uid", "data.uid")`.
    pub extras: Vec<(&'static str, &'static str)>,
}

impl GrantSource {
    pub fn new(token: TokenSource) -> Self {
        Self {
            token,
            refresh_token: None,
            extras: Vec::new(),
        }
    }

    pub(crate) fn needs_json(&self) -> bool {
        matches!(self.token, TokenSource::JsonField(_))
            || self.refresh_token.is_some()
            || !self.extras.is_empty()
    }
}

/// GET a page and scrape a hidden form token from it before logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreLogin {
    pub path: &'static str,
    /// Tried in order; the first that matches wins.
    pub rules: Vec<ExtractionRule>,
    /// Form field the scraped value is sent as.
    pub field: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub pre_login: Option<PreLogin>,
    pub path: &'static str,
    pub encoding: BodyEncoding,
    pub login_field: &'static str,
    pub password_field: &'static str,
    pub extra_fields: Vec<(&'static str, &'static str)>,
    pub headers: Vec<(&'static str, &'static str)>,
    pub grant: GrantSource,
    pub success: Option<StatusCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub path: &'static str,
    pub encoding: BodyEncoding,
    pub token_field: &'static str,
    pub extra_fields: Vec<(&'static str, &'static str)>,
    pub headers: Vec<(&'static str, &'static str)>,
    pub grant: GrantSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    pub method: Method,
    pub path: &'static str,
    /// If set, `path` is a page whose logout link is scraped with this rule
    /// and then followed.
    pub link_rule: Option<ExtractionRule>,
    /// Prepended to the scraped link before it is followed.
    pub link_prefix: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFlow {
    Request(LoginRequest),
    /// Token-only vendors: the configured token is the session.
    StaticToken,
}

/// Everything needed to authenticate against one vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthScheme {
    pub login: LoginFlow,
    pub refresh: Option<RefreshRequest>,
    pub logout: Option<LogoutRequest>,
    pub placement: TokenPlacement,
    pub expiry: ExpiryPolicy,
    /// Body markers that mean "session expired" on an otherwise normal
    /// response. HTTP 401 always does.
    pub expired_markers: Vec<FieldMatch>,
    /// Envelope check applied to authenticated JSON responses.
    pub envelope: Option<StatusCheck>,
}

impl AuthScheme {
    /// Static-token scheme with the token sent as `placement`.
    pub fn static_token(placement: TokenPlacement) -> Self {
        Self {
            login: LoginFlow::StaticToken,
            refresh: None,
            logout: None,
            placement,
            expiry: ExpiryPolicy::Never,
            expired_markers: Vec::new(),
            envelope: None,
        }
    }

    pub fn uses_cookies(&self) -> bool {
        matches!(self.placement, TokenPlacement::CookieJar)
            || matches!(
                &self.login,
                LoginFlow::Request(req) if req.grant.token == TokenSource::Cookie || req.pre_login.is_some()
            )
    }
}
