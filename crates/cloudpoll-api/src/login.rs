// Session lifecycle: login, refresh, ensure-valid, logout
//
// Interprets the vendor's `AuthScheme` against the client's HTTP
// connection. A new session is only ever installed after every token the
// scheme demands was found and non-empty; anything less fails closed.

use std::collections::BTreeMap;

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::auth::{Credentials, GrantSource, LoginFlow, LoginRequest, RefreshRequest, TokenSource};
use crate::client::VendorClient;
use crate::envelope::{
    BodyEncoding, Method, Request, ResponseEnvelope, StatusCheck, lookup, scalar_to_string,
};
use crate::error::{AuthError, Error};
use crate::session::{ExpiryHint, Session, SessionGrant, SessionStatus};

impl VendorClient {
    /// Log in from scratch.
    ///
    /// Returns a `Valid` session on success. The caller's existing session is
    /// untouched on failure.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        if credentials.is_blank() {
            return Err(AuthError::InvalidCredentials("credentials are empty".into()));
        }
        match &self.scheme().login {
            LoginFlow::StaticToken => static_session(credentials),
            LoginFlow::Request(request) => {
                let Credentials::Password { login, password } = credentials else {
                    return Err(AuthError::InvalidCredentials(
                        "this vendor needs a login and password".into(),
                    ));
                };
                self.login_request(request, login, password)
                    .await
                    .map_err(AuthError::from)
            }
        }
    }

    async fn login_request(
        &self,
        request: &LoginRequest,
        login: &str,
        password: &SecretString,
    ) -> Result<Session, Error> {
        let mut fields: Vec<(&str, String)> = vec![
            (request.login_field, login.to_owned()),
            (request.password_field, password.expose_secret().to_owned()),
        ];
        fields.extend(request.extra_fields.iter().map(|(k, v)| (*k, (*v).to_owned())));

        if let Some(pre) = &request.pre_login {
            let url = self.url(pre.path)?;
            debug!(%url, "fetching pre-login page");
            let page = self.text(self.send(self.http().get(url)).await?).await?;
            let mut last_err = None;
            let mut token = None;
            for rule in &pre.rules {
                match rule.apply(&page) {
                    Ok(value) => {
                        debug!(rule = %rule.id(), "pre-login token found");
                        token = Some(value.to_owned());
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            match (token, last_err) {
                (Some(token), _) => fields.push((pre.field, token)),
                (None, Some(e)) => return Err(e.into()),
                (None, None) => {
                    return Err(Error::Deserialization {
                        message: "no pre-login extraction rule configured".into(),
                        body: String::new(),
                    });
                }
            }
        }

        let url = self.url(request.path)?;
        debug!(%url, account = login, "logging in");

        let mut builder = encode(self.http().post(url), request.encoding, &fields);
        for (name, value) in &request.headers {
            builder = builder.header(*name, *value);
        }
        let resp = self.send(builder).await?;
        let status = resp.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(Error::Authentication {
                message: format!("login refused (HTTP {status})"),
            });
        }
        if !status.is_success() {
            return Err(Error::Vendor {
                code: status.as_u16().to_string(),
                message: "login endpoint failed".into(),
            });
        }

        let headers = resp.headers().clone();
        let text = self.text(resp).await?;
        let session = self.grant_session(
            login,
            &request.grant,
            request.success.as_ref(),
            &headers,
            &text,
        )?;
        info!(account = login, "login successful");
        Ok(session)
    }

    /// Renew an expired session with its refresh token. Falls back to a full
    /// login when the scheme has no refresh grant, the session holds no
    /// refresh token, or the refresh is refused.
    pub async fn refresh(
        &self,
        session: &Session,
        credentials: &Credentials,
    ) -> Result<Session, AuthError> {
        if let (Some(refresh), Some(token)) = (&self.scheme().refresh, session.refresh_token()) {
            match self
                .refresh_request(refresh, session.account_id(), token)
                .await
            {
                Ok(renewed) => return Ok(renewed),
                Err(e) => debug!(error = %e, "refresh failed, logging in again"),
            }
        }
        self.login(credentials).await
    }

    async fn refresh_request(
        &self,
        request: &RefreshRequest,
        account: &str,
        token: &SecretString,
    ) -> Result<Session, Error> {
        let mut fields: Vec<(&str, String)> =
            vec![(request.token_field, token.expose_secret().to_owned())];
        fields.extend(request.extra_fields.iter().map(|(k, v)| (*k, (*v).to_owned())));

        let url = self.url(request.path)?;
        debug!(%url, "refreshing session");
        let mut builder = encode(self.http().post(url), request.encoding, &fields);
        for (name, value) in &request.headers {
            builder = builder.header(*name, *value);
        }
        let resp = self.send(builder).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Authentication {
                message: format!("refresh refused (HTTP {status})"),
            });
        }
        let headers = resp.headers().clone();
        let text = self.text(resp).await?;
        self.grant_session(account, &request.grant, None, &headers, &text)
    }

    /// Make sure `session` is usable, logging in or refreshing as needed.
    ///
    /// No-op for a valid, unexpired session. On failure the session keeps
    /// its previous status, except that refused credentials mark it
    /// `Invalid`.
    pub async fn ensure_valid(
        &self,
        session: &mut Session,
        credentials: &Credentials,
    ) -> Result<(), AuthError> {
        if session.is_valid_at(Utc::now()) {
            return Ok(());
        }
        if session.status() == SessionStatus::Valid {
            debug!(account = session.account_id(), "session reached its expiry");
            session.mark_expired();
        }

        let result = if session.status() == SessionStatus::Expired {
            self.refresh(session, credentials).await
        } else {
            self.login(credentials).await
        };

        match result {
            Ok(fresh) => {
                *session = fresh;
                Ok(())
            }
            Err(e) => {
                if matches!(e, AuthError::InvalidCredentials(_)) {
                    session.invalidate();
                }
                Err(e)
            }
        }
    }

    /// End the session. Best effort: failures are logged and swallowed, and
    /// the session is cleared either way.
    pub async fn logout(&self, session: &mut Session) {
        let logout = self.scheme().logout.clone().filter(|_| session.is_valid());
        if let Some(logout) = logout {
            let mut request = match logout.method {
                Method::Get => Request::get(logout.path),
                Method::Post => Request::post_form(logout.path, Vec::new()),
            };
            if logout.link_rule.is_some() {
                request = request.as_text();
            }

            let outcome = match self.fetch(session, &request).await {
                Ok(Value::String(page)) => match logout.link_rule {
                    Some(rule) => match rule.apply(&page) {
                        Ok(link) => {
                            self.follow_link(&format!("{}{link}", logout.link_prefix))
                                .await
                        }
                        Err(e) => Err(e.to_string()),
                    },
                    None => Ok(()),
                },
                Ok(_) => Ok(()),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(()) => debug!(account = session.account_id(), "logged out"),
                Err(e) => warn!(account = session.account_id(), error = %e, "logout failed"),
            }
        }
        session.clear();
    }

    async fn follow_link(&self, link: &str) -> Result<(), String> {
        let url = self.url(&link.replace("&amp;", "&")).map_err(|e| e.to_string())?;
        self.send(self.http().get(url))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Build a session from a grant response, failing closed on any
    /// missing or empty token.
    fn grant_session(
        &self,
        account: &str,
        grant: &GrantSource,
        success: Option<&StatusCheck>,
        headers: &HeaderMap,
        text: &str,
    ) -> Result<Session, Error> {
        let body = if grant.needs_json() || success.is_some() {
            let body: Value = serde_json::from_str(text).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text.to_owned(),
            })?;
            Some(ResponseEnvelope::parse(body, success).into_result()?)
        } else {
            None
        };

        let access_token = match &grant.token {
            TokenSource::JsonField(path) => Some(required(body.as_ref(), path, "access token")?),
            TokenSource::Header(name) => {
                let value = headers
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                Some(non_empty(value, "access token header")?)
            }
            TokenSource::Anchor(rule) => Some(non_empty(rule.apply(text)?, "access token")?),
            TokenSource::Cookie => None,
        };

        let refresh_token = grant
            .refresh_token
            .map(|path| required(body.as_ref(), path, "refresh token"))
            .transpose()?;

        let mut extras = BTreeMap::new();
        for (key, path) in &grant.extras {
            let value = body
                .as_ref()
                .and_then(|b| lookup(b, path))
                .map(scalar_to_string)
                .unwrap_or_default();
            extras.insert((*key).to_owned(), value);
        }

        let mut session = Session::new(account);
        session.establish(SessionGrant {
            access_token,
            refresh_token,
            extras,
            expiry: self.scheme().expiry.hint(Utc::now(), body.as_ref()),
        });
        Ok(session)
    }
}

fn static_session(credentials: &Credentials) -> Result<Session, AuthError> {
    let Credentials::Token(token) = credentials else {
        return Err(AuthError::InvalidCredentials(
            "this vendor needs an application token".into(),
        ));
    };
    let mut session = Session::new(credentials.account_id());
    session.establish(SessionGrant {
        access_token: Some(token.clone()),
        refresh_token: None,
        extras: BTreeMap::new(),
        expiry: ExpiryHint::Never,
    });
    Ok(session)
}

fn encode(
    builder: reqwest::RequestBuilder,
    encoding: BodyEncoding,
    fields: &[(&str, String)],
) -> reqwest::RequestBuilder {
    match encoding {
        BodyEncoding::Form => builder.form(fields),
        BodyEncoding::Json => {
            let body: Map<String, Value> = fields
                .iter()
                .map(|(k, v)| ((*k).to_owned(), Value::String(v.clone())))
                .collect();
            builder.json(&body)
        }
    }
}

fn required(body: Option<&Value>, path: &str, what: &str) -> Result<SecretString, Error> {
    let value = body
        .and_then(|b| lookup(b, path))
        .map(scalar_to_string)
        .unwrap_or_default();
    non_empty(&value, what)
}

fn non_empty(value: &str, what: &str) -> Result<SecretString, Error> {
    if value.trim().is_empty() {
        return Err(Error::Deserialization {
            message: format!("{what} missing or empty"),
            body: String::new(),
        });
    }
    Ok(SecretString::from(value.to_owned()))
}
