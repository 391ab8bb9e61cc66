// ── Vendor bindings ──
//
// A `Binding` is everything the handler needs from one vendor: session
// upkeep, the status request, mapping, device listing, and control
// requests. `HttpBinding` drives all of it from a `BindingProfile`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::FixedOffset;
use cloudpoll_api::auth::ExpiryPolicy;
use cloudpoll_api::envelope::scalar_to_string;
use cloudpoll_api::transport::DEFAULT_USER_AGENT;
use cloudpoll_api::{
    AuthError, Credentials, FetchError, Request, Session, TransportConfig, VendorClient,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::ThingConfig;
use crate::error::{CoreError, PollError};
use crate::mapper::{ResponseMapper, VendorZone, normalize_sections, resolve};
use crate::model::{ChannelKind, ChannelUpdate, Command, DiscoveredDevice};
use crate::vendors::{
    BindingProfile, DiscoveryProfile, DiscoverySource, SegmentKey, TemplateVars, lookup_profile,
};

/// Vendor-specific half of a thing handler.
///
/// Every method taking `&mut Session` is called with the thing's session
/// lock held, so implementations never see two calls at once for the same
/// thing.
pub trait Binding: Send + Sync + 'static {
    fn vendor(&self) -> &str;

    /// A fresh, unauthenticated session for this account.
    fn new_session(&self) -> Session;

    /// Log in or refresh unless the session is already usable.
    fn ensure_valid(
        &self,
        session: &mut Session,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Fetch the raw status payload, re-authenticating once if the vendor
    /// rejects the session.
    fn fetch_status(
        &self,
        session: &mut Session,
    ) -> impl Future<Output = Result<Value, PollError>> + Send;

    /// Map a status payload for this thing.
    fn map_response(&self, payload: &Value) -> Vec<ChannelUpdate>;

    /// Map only the part of a shared payload that belongs to `segment`.
    fn map_segment(&self, payload: &Value, segment: &str) -> Vec<ChannelUpdate>;

    fn list_devices(
        &self,
        session: &mut Session,
    ) -> impl Future<Output = Result<Vec<DiscoveredDevice>, PollError>> + Send;

    /// Send a control command. The handler has already checked the
    /// command against [`command_kind`](Self::command_kind).
    fn send_command(
        &self,
        session: &mut Session,
        channel: &str,
        command: &Command,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Best-effort logout; the session is cleared afterwards.
    fn logout(&self, session: &mut Session) -> impl Future<Output = ()> + Send;

    /// Kind of a controllable channel, `None` when the channel takes no
    /// commands.
    fn command_kind(&self, channel: &str) -> Option<ChannelKind>;

    fn supports_discovery(&self) -> bool;
}

// ── HttpBinding ─────────────────────────────────────────────────────

/// Profile-driven binding talking to a vendor's HTTP API.
pub struct HttpBinding {
    profile: &'static BindingProfile,
    client: VendorClient,
    credentials: Credentials,
    mapper: ResponseMapper,
    vars: TemplateVars,
    segment: Option<String>,
    honor_service_flag: bool,
    control_code: Option<SecretString>,
    currency: Option<String>,
}

impl HttpBinding {
    /// Build the binding for `config.vendor`.
    pub fn new(config: &ThingConfig) -> Result<Self, CoreError> {
        let profile = lookup_profile(&config.vendor).ok_or_else(|| CoreError::Config {
            message: format!("unknown vendor '{}'", config.vendor),
        })?;
        Self::from_profile(profile, config)
    }

    pub fn from_profile(
        profile: &'static BindingProfile,
        config: &ThingConfig,
    ) -> Result<Self, CoreError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(profile.base_url)
                .map_err(|e| CoreError::from(cloudpoll_api::Error::from(e)))?,
        };

        let scheme = match config.relogin_every_hour {
            None => Arc::clone(&profile.auth),
            Some(hourly) => {
                let mut scheme = (*profile.auth).clone();
                scheme.expiry = match (hourly, scheme.expiry) {
                    (true, _) => ExpiryPolicy::HourBoundary,
                    (false, ExpiryPolicy::HourBoundary) => ExpiryPolicy::Never,
                    (false, other) => other,
                };
                Arc::new(scheme)
            }
        };

        let transport = TransportConfig {
            timeout: config.timeout,
            user_agent: config
                .user_agent
                .clone()
                .or_else(|| profile.user_agent.map(str::to_owned))
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
            accept_language: profile.accept_language.map(str::to_owned),
            default_headers: profile
                .default_headers
                .iter()
                .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
                .collect(),
            ..TransportConfig::default()
        };
        let client = VendorClient::new(base_url, scheme, &transport)?;

        let zone = match config.utc_offset {
            Some(offset) => VendorZone::Fixed(offset),
            None => VendorZone::named(profile.timezone).ok_or_else(|| CoreError::Config {
                message: format!("unknown time zone '{}'", profile.timezone),
            })?,
        };

        if profile.status_needs_device && config.device_id.is_none() {
            return Err(CoreError::Config {
                message: format!("vendor '{}' needs a device id", profile.vendor),
            });
        }

        let segment = match (profile.segment, &config.currency) {
            (Some(SegmentKey::Device), _) => config.device_id.clone(),
            (Some(SegmentKey::Currency(translate)), Some(currency)) => Some(
                translate(currency)
                    .ok_or_else(|| CoreError::Config {
                        message: format!("unknown currency '{currency}'"),
                    })?
                    .to_owned(),
            ),
            _ => None,
        };

        let device_type = config
            .device_type
            .clone()
            .or_else(|| profile.discovery.as_ref().map(|d| d.default_type.to_owned()))
            .unwrap_or_default();
        let vars = TemplateVars::new()
            .with("device", config.device_id.clone().unwrap_or_default())
            .with("device_type", device_type)
            .with("lang", config.lang.clone().unwrap_or_else(|| "en".into()))
            .with("currency", config.currency.clone().unwrap_or_default())
            .with("utc_offset", timezone_offset_minutes(config.utc_offset));

        Ok(Self {
            profile,
            client,
            credentials: config.credentials.clone(),
            mapper: ResponseMapper::new(profile.mapping.clone(), zone),
            vars,
            segment,
            honor_service_flag: config.honor_service_flag,
            control_code: config.control_code.clone(),
            currency: config.currency.as_ref().map(|c| c.trim().to_ascii_uppercase()),
        })
    }

    pub fn profile(&self) -> &'static BindingProfile {
        self.profile
    }

    pub fn client(&self) -> &VendorClient {
        &self.client
    }

    /// Send `request`; on a rejected session re-authenticate and retry
    /// exactly once.
    async fn request(&self, session: &mut Session, request: &Request) -> Result<Value, PollError> {
        match self.client.fetch(session, request).await {
            Err(FetchError::Unauthorized) => {
                debug!(vendor = self.profile.vendor, "session rejected, re-authenticating");
                session.mark_expired();
                self.client.ensure_valid(session, &self.credentials).await?;
                match self.client.fetch(session, request).await {
                    Err(FetchError::Unauthorized) => Err(PollError::Fetch(
                        FetchError::CommunicationError(
                            "session rejected after re-authentication".into(),
                        ),
                    )),
                    other => other.map_err(PollError::from),
                }
            }
            other => other.map_err(PollError::from),
        }
    }

    async fn prepare(&self, session: &mut Session) -> Result<(), PollError> {
        if let Some(prepare) = &self.profile.prepare {
            self.request(session, &prepare.render(&self.vars)).await?;
        }
        Ok(())
    }

    fn check_device(&self, payload: &Value) -> Result<(), PollError> {
        if let Some(marker) = self
            .profile
            .offline_marker
            .as_ref()
            .filter(|marker| marker.check.matches(payload))
        {
            return Err(PollError::DeviceOffline(marker.reason.to_owned()));
        }
        if self.honor_service_flag
            && self
                .profile
                .service_marker
                .is_some_and(|marker| marker.matches(payload))
        {
            return Err(PollError::DeviceOffline("In service mode".into()));
        }
        Ok(())
    }

    fn json_devices(
        &self,
        discovery: &DiscoveryProfile,
        payload: &Value,
    ) -> Vec<DiscoveredDevice> {
        let DiscoverySource::Json {
            list_path,
            id_field,
            name_field,
            type_field,
            filter,
        } = &discovery.source
        else {
            return Vec::new();
        };
        let Some(list) = resolve(payload, list_path) else {
            warn!(vendor = self.profile.vendor, list_path, "device list missing");
            return Vec::new();
        };

        normalize_sections(list)
            .into_iter()
            .filter(|(_, item)| filter.is_none_or(|f| f.matches(item)))
            .filter_map(|(_, item)| {
                let id = resolve(item, id_field)
                    .map(scalar_to_string)
                    .filter(|id| !id.is_empty())?;
                let name = name_field
                    .and_then(|field| resolve(item, field))
                    .map(scalar_to_string)
                    .filter(|name| !name.is_empty());
                let device_type = type_field
                    .and_then(|field| resolve(item, field))
                    .map(scalar_to_string)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| discovery.default_type.to_owned());
                let mut properties = BTreeMap::new();
                for (property, path) in &discovery.properties {
                    if let Some(value) = resolve(item, path) {
                        properties.insert((*property).to_owned(), scalar_to_string(value));
                    }
                }
                Some(self.device(discovery, id, name, device_type, properties))
            })
            .collect()
    }

    fn anchor_devices(&self, discovery: &DiscoveryProfile, payload: &Value) -> Vec<DiscoveredDevice> {
        let DiscoverySource::Anchors(sources) = &discovery.source else {
            return Vec::new();
        };
        let Some(page) = payload.as_str() else {
            warn!(vendor = self.profile.vendor, "expected an HTML page for discovery");
            return Vec::new();
        };

        let mut ids: Vec<String> = Vec::new();
        for source in sources {
            for raw in source.rule.scan_all(page) {
                let id = match source.translate {
                    Some(translate) => match translate(raw) {
                        Some(id) => id.to_owned(),
                        None => {
                            debug!(rule = %source.rule.id(), raw, "untranslatable id skipped");
                            continue;
                        }
                    },
                    None => raw.to_owned(),
                };
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            if !ids.is_empty() {
                break;
            }
        }

        ids.into_iter()
            .filter(|id| {
                self.currency
                    .as_deref()
                    .is_none_or(|wanted| id.eq_ignore_ascii_case(wanted))
            })
            .map(|id| {
                self.device(
                    discovery,
                    id,
                    None,
                    discovery.default_type.to_owned(),
                    BTreeMap::new(),
                )
            })
            .collect()
    }

    fn device(
        &self,
        discovery: &DiscoveryProfile,
        id: String,
        name: Option<String>,
        device_type: String,
        mut properties: BTreeMap<String, String>,
    ) -> DiscoveredDevice {
        properties.insert(discovery.id_property.to_owned(), id.clone());
        DiscoveredDevice {
            display_name: name.unwrap_or_else(|| format!("{} {id}", self.profile.vendor)),
            external_id: id,
            device_type,
            properties,
        }
    }
}

impl Binding for HttpBinding {
    fn vendor(&self) -> &str {
        self.profile.vendor
    }

    fn new_session(&self) -> Session {
        Session::new(self.credentials.account_id())
    }

    async fn ensure_valid(&self, session: &mut Session) -> Result<(), AuthError> {
        self.client.ensure_valid(session, &self.credentials).await
    }

    async fn fetch_status(&self, session: &mut Session) -> Result<Value, PollError> {
        self.prepare(session).await?;

        // Profiles use either one unkeyed request or several keyed ones.
        let mut unkeyed = None;
        let mut merged = Map::new();
        for status in &self.profile.status {
            let payload = self.request(session, &status.request.render(&self.vars)).await?;
            match status.key {
                Some(key) => {
                    merged.insert(key.to_owned(), payload);
                }
                None => unkeyed = Some(payload),
            }
        }
        let payload = unkeyed.unwrap_or(Value::Object(merged));
        self.check_device(&payload)?;
        Ok(payload)
    }

    fn map_response(&self, payload: &Value) -> Vec<ChannelUpdate> {
        match &self.segment {
            Some(segment) => self.map_segment(payload, segment),
            None => self.mapper.map(payload),
        }
    }

    fn map_segment(&self, payload: &Value, segment: &str) -> Vec<ChannelUpdate> {
        self.mapper.map_segment(payload, segment)
    }

    async fn list_devices(&self, session: &mut Session) -> Result<Vec<DiscoveredDevice>, PollError> {
        let Some(discovery) = &self.profile.discovery else {
            return Ok(Vec::new());
        };
        let payload = self.request(session, &discovery.request.render(&self.vars)).await?;
        let mut devices = match discovery.source {
            DiscoverySource::Json { .. } => self.json_devices(discovery, &payload),
            DiscoverySource::Anchors(_) => self.anchor_devices(discovery, &payload),
        };
        if !discovery.allowed_types.is_empty() {
            devices.retain(|d| {
                let supported = discovery.allowed_types.contains(&d.device_type.as_str());
                if !supported {
                    debug!(id = %d.external_id, device_type = %d.device_type, "unsupported device type");
                }
                supported
            });
        }
        Ok(devices)
    }

    async fn send_command(
        &self,
        session: &mut Session,
        channel: &str,
        command: &Command,
    ) -> Result<(), CoreError> {
        let route = self
            .profile
            .command_route(channel)
            .ok_or_else(|| CoreError::Unsupported {
                operation: format!("command on {channel}"),
                vendor: self.profile.vendor.to_owned(),
            })?;

        self.prepare(session).await?;
        let vars = self
            .vars
            .clone()
            .with("channel", channel)
            .with("value", command.payload())
            .with(
                "code",
                self.control_code
                    .as_ref()
                    .map(|code| code.expose_secret().to_owned())
                    .unwrap_or_default(),
            );
        self.request(session, &route.request.render(&vars)).await?;
        debug!(vendor = self.profile.vendor, channel, "command sent");
        Ok(())
    }

    async fn logout(&self, session: &mut Session) {
        self.client.logout(session).await;
    }

    fn command_kind(&self, channel: &str) -> Option<ChannelKind> {
        self.profile.command_route(channel).map(|route| route.kind)
    }

    fn supports_discovery(&self) -> bool {
        self.profile.discovery.is_some()
    }
}

/// UTC offset in JavaScript `getTimezoneOffset()` minutes (UTC+1 is `-60`).
fn timezone_offset_minutes(offset: Option<FixedOffset>) -> String {
    offset.map_or(0, |o| -o.local_minus_utc() / 60).to_string()
}
