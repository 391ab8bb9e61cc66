// Vendor HTTP client
//
// Wraps `reqwest::Client` with base-URL joining, token placement, and
// envelope/expiry classification. Login, refresh and logout live in
// `login.rs` as inherent methods so this module stays focused on transport
// mechanics.

use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::cookie::Jar;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::auth::{AuthScheme, TokenPlacement};
use crate::envelope::{Method, Request, RequestBody, ResponseEnvelope, ResponseFormat};
use crate::error::{Error, FetchError};
use crate::session::Session;
use crate::transport::TransportConfig;

/// Raw HTTP client for one vendor account.
///
/// The client is cheap to share by reference; the underlying connection
/// pool and cookie jar are reused by every request made through it.
pub struct VendorClient {
    http: reqwest::Client,
    base_url: Url,
    scheme: Arc<AuthScheme>,
    timeout_secs: u64,
}

impl VendorClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// A cookie jar is attached automatically when the scheme keeps its
    /// session in cookies.
    pub fn new(
        base_url: Url,
        scheme: Arc<AuthScheme>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let config = if scheme.uses_cookies() && transport.cookie_jar.is_none() {
            transport.clone().with_cookie_jar()
        } else {
            transport.clone()
        };
        let http = config.build_client()?;
        Ok(Self {
            http,
            base_url: normalize_base(base_url),
            scheme,
            timeout_secs: config.timeout_secs(),
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        scheme: Arc<AuthScheme>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
            scheme,
            timeout_secs,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn scheme(&self) -> &AuthScheme {
        &self.scheme
    }

    /// Resolve a vendor path against the base URL. Absolute URLs pass through.
    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Send a request and map transport failures (timeouts in particular).
    pub(crate) async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, Error> {
        builder.send().await.map_err(|e| self.transport_error(e))
    }

    pub(crate) async fn text(&self, resp: reqwest::Response) -> Result<String, Error> {
        resp.text().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            Error::Transport(err)
        }
    }

    /// Execute an authenticated request.
    ///
    /// Refuses to touch the network unless `session` is valid. HTTP 401 and
    /// the scheme's expired markers come back as [`FetchError::Unauthorized`];
    /// the caller marks the session expired and re-authenticates.
    pub async fn fetch(&self, session: &Session, request: &Request) -> Result<Value, FetchError> {
        if !session.is_valid() {
            return Err(FetchError::Unauthorized);
        }

        let url = self.url(&request.path).map_err(FetchError::from)?;
        debug!(method = ?request.method, %url, "vendor request");

        let mut builder = match request.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            RequestBody::None => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Json(body) => builder.json(body),
        };
        builder = self.authorize(builder, session);

        let resp = self.send(builder).await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            debug!("vendor answered 401");
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            return Err(FetchError::CommunicationError(format!("HTTP {status}")));
        }

        let text = self.text(resp).await?;
        trace!(body = %text, "vendor response");

        match request.format {
            ResponseFormat::Text => Ok(Value::String(text)),
            ResponseFormat::Json => self.decode(&text).map_err(FetchError::from),
        }
    }

    /// Parse a JSON body, check expiry markers, then unwrap the envelope.
    pub(crate) fn decode(&self, text: &str) -> Result<Value, Error> {
        let body: Value = serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })?;
        if self.scheme.expired_markers.iter().any(|m| m.matches(&body)) {
            debug!("vendor signalled expired session");
            return Err(Error::SessionExpired);
        }
        ResponseEnvelope::parse(body, self.scheme.envelope.as_ref()).into_result()
    }

    /// Apply the scheme's token placement to a request.
    pub(crate) fn authorize(
        &self,
        builder: reqwest::RequestBuilder,
        session: &Session,
    ) -> reqwest::RequestBuilder {
        let token = session.access_token().map(ExposeSecret::expose_secret);
        match (&self.scheme.placement, token) {
            (TokenPlacement::Bearer, Some(token)) => builder.bearer_auth(token),
            (TokenPlacement::Header(name), Some(token)) => builder.header(*name, token),
            (TokenPlacement::Query(name), Some(token)) => builder.query(&[(*name, token)]),
            (TokenPlacement::HeaderTemplate { name, template }, _) => {
                builder.header(*name, session.render(template))
            }
            _ => builder,
        }
    }
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::TokenPlacement;

    fn client(base: &str) -> VendorClient {
        VendorClient::with_client(
            reqwest::Client::new(),
            Url::parse(base).unwrap(),
            Arc::new(AuthScheme::static_token(TokenPlacement::Query("token"))),
            10,
        )
    }

    #[test]
    fn relative_paths_keep_base_prefix() {
        let c = client("https://engage.example.com/mobile_proxy");
        assert_eq!(
            c.url("getCurrentValuesSummary").unwrap().as_str(),
            "https://engage.example.com/mobile_proxy/getCurrentValuesSummary"
        );
        assert_eq!(
            c.url("/app/ja100/ajax/stav.php").unwrap().as_str(),
            "https://engage.example.com/mobile_proxy/app/ja100/ajax/stav.php"
        );
    }

    #[test]
    fn absolute_links_pass_through() {
        let c = client("https://www.example.com/en/");
        assert_eq!(
            c.url("https://www.example.com/en/logout?x=1").unwrap().as_str(),
            "https://www.example.com/en/logout?x=1"
        );
    }

    #[test]
    fn decode_flags_malformed_json() {
        let c = client("https://x.example/");
        assert!(matches!(
            c.decode("<html>"),
            Err(Error::Deserialization { .. })
        ));
    }
}
