// Per-account session state
//
// A `Session` holds whatever the vendor issued at login: an access token,
// an optional refresh token, and vendor extras such as a user id or the
// login timestamp some APIs echo back in every request. Sessions are never
// shared across accounts; the owning handler keeps exactly one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No login attempted yet, or cleared after logout/dispose.
    Unauthenticated,
    /// Usable for requests.
    Valid,
    /// The vendor rejected the session, or its expiry passed. Re-login needed.
    Expired,
    /// The vendor rejected the credentials themselves. Retrying will not help
    /// until the configuration changes.
    Invalid,
}

/// When a valid session stops being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryHint {
    /// Valid until the vendor says otherwise.
    Never,
    /// Valid until this instant (explicit TTL or a forced re-login boundary).
    At(DateTime<Utc>),
}

impl ExpiryHint {
    pub fn has_passed(self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::At(deadline) => now >= deadline,
        }
    }
}

/// Everything a successful login or refresh produced.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub extras: BTreeMap<String, String>,
    pub expiry: ExpiryHint,
}

/// Server-issued credential state for one vendor account.
#[derive(Debug, Clone)]
pub struct Session {
    account_id: String,
    access_token: Option<SecretString>,
    refresh_token: Option<SecretString>,
    extras: BTreeMap<String, String>,
    expiry: ExpiryHint,
    status: SessionStatus,
}

impl Session {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            access_token: None,
            refresh_token: None,
            extras: BTreeMap::new(),
            expiry: ExpiryHint::Never,
            status: SessionStatus::Unauthenticated,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn expiry(&self) -> ExpiryHint {
        self.expiry
    }

    pub fn access_token(&self) -> Option<&SecretString> {
        self.access_token.as_ref()
    }

    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(String::as_str)
    }

    /// `true` if the session is `Valid` and its expiry has not passed.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Valid && !self.expiry.has_passed(now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Install a fresh grant and mark the session `Valid`.
    pub fn establish(&mut self, grant: SessionGrant) {
        self.access_token = grant.access_token;
        self.refresh_token = grant.refresh_token;
        self.extras = grant.extras;
        self.expiry = grant.expiry;
        self.status = SessionStatus::Valid;
    }

    /// The vendor no longer accepts this session. Tokens are kept so a
    /// refresh grant can still be attempted.
    pub fn mark_expired(&mut self) {
        if self.status == SessionStatus::Valid {
            self.status = SessionStatus::Expired;
        }
    }

    /// The vendor rejected the credentials.
    pub fn invalidate(&mut self) {
        self.drop_tokens();
        self.status = SessionStatus::Invalid;
    }

    /// Forget everything the vendor issued.
    pub fn clear(&mut self) {
        self.drop_tokens();
        self.status = SessionStatus::Unauthenticated;
    }

    /// Substitute `{token}`, `{refresh_token}`, `{account}` and any
    /// `{<extra>}` placeholder in `template`. Unknown placeholders are left
    /// untouched.
    pub fn render(&self, template: &str) -> String {
        let mut out = template.to_owned();
        if let Some(token) = &self.access_token {
            out = out.replace("{token}", token.expose_secret());
        }
        if let Some(token) = &self.refresh_token {
            out = out.replace("{refresh_token}", token.expose_secret());
        }
        out = out.replace("{account}", &self.account_id);
        for (key, value) in &self.extras {
            out = out.replace(&format!("{{{key}}}"), value);
        }
        out
    }

    fn drop_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.extras.clear();
        self.expiry = ExpiryHint::Never;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn grant(expiry: ExpiryHint) -> SessionGrant {
        SessionGrant {
            access_token: Some(SecretString::from("tok".to_owned())),
            refresh_token: Some(SecretString::from("ref".to_owned())),
            extras: BTreeMap::from([("uid".to_owned(), "42".to_owned())]),
            expiry,
        }
    }

    #[test]
    fn new_session_is_unauthenticated() {
        let session = Session::new("user@example.com");
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
        assert!(!session.is_valid());
    }

    #[test]
    fn ttl_expiry_is_observed() {
        let now = Utc::now();
        let mut session = Session::new("a");
        session.establish(grant(ExpiryHint::At(now + TimeDelta::seconds(30))));
        assert!(session.is_valid_at(now));
        assert!(!session.is_valid_at(now + TimeDelta::seconds(30)));
    }

    #[test]
    fn expired_keeps_refresh_token() {
        let mut session = Session::new("a");
        session.establish(grant(ExpiryHint::Never));
        session.mark_expired();
        assert_eq!(session.status(), SessionStatus::Expired);
        assert!(session.refresh_token().is_some());
    }

    #[test]
    fn mark_expired_does_not_resurrect_cleared_session() {
        let mut session = Session::new("a");
        session.mark_expired();
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
    }

    #[test]
    fn clear_drops_tokens() {
        let mut session = Session::new("a");
        session.establish(grant(ExpiryHint::Never));
        session.clear();
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
        assert!(session.access_token().is_none());
        assert!(session.extra("uid").is_none());
    }

    #[test]
    fn render_substitutes_known_placeholders() {
        let mut session = Session::new("acct");
        session.establish(grant(ExpiryHint::Never));
        assert_eq!(
            session.render(r#"{"uid":"{uid}","token":"{token}","who":"{account}","x":"{nope}"}"#),
            r#"{"uid":"42","token":"tok","who":"acct","x":"{nope}"}"#
        );
    }
}
