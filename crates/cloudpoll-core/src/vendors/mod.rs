// ── Vendor binding profiles ──
//
// Each vendor is described as data: endpoints, authentication scheme,
// field→channel table, discovery source, and command routes. Profiles are
// process-wide read-only tables built once on first use.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cloudpoll_api::envelope::{FieldMatch, Method, Request, RequestBody, ResponseFormat};
use cloudpoll_api::{AuthScheme, ExtractionRule};
use serde_json::{Map, Value};

use crate::mapper::MappingTable;
use crate::model::ChannelKind;

pub mod efergy;
pub mod goodwe;
pub mod jablotron;
pub mod mintos;
pub mod zonky;

// ── Request templates ───────────────────────────────────────────────

/// Placeholder values substituted into request templates: `{device}`,
/// `{device_type}`, `{lang}`, `{currency}`, `{code}`, `{channel}`,
/// `{value}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars(BTreeMap<&'static str, String>);

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &'static str, value: impl Into<String>) -> &mut Self {
        self.0.insert(name, value.into());
        self
    }

    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Replace every known `{name}`. Unknown placeholders are left as is.
    pub fn render(&self, template: &str) -> String {
        self.0.iter().fold(template.to_owned(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateBody {
    None,
    Form(Vec<(&'static str, &'static str)>),
    /// A flat JSON object of strings.
    Json(Vec<(&'static str, &'static str)>),
}

/// A vendor request with placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTemplate {
    pub method: Method,
    pub path: &'static str,
    pub query: Vec<(&'static str, &'static str)>,
    pub body: TemplateBody,
    pub format: ResponseFormat,
}

impl RequestTemplate {
    pub fn get(path: &'static str) -> Self {
        Self {
            method: Method::Get,
            path,
            query: Vec::new(),
            body: TemplateBody::None,
            format: ResponseFormat::Json,
        }
    }

    pub fn post_form(path: &'static str, fields: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            method: Method::Post,
            body: TemplateBody::Form(fields),
            ..Self::get(path)
        }
    }

    pub fn post_json(path: &'static str, fields: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            method: Method::Post,
            body: TemplateBody::Json(fields),
            ..Self::get(path)
        }
    }

    pub fn with_query(mut self, name: &'static str, value: &'static str) -> Self {
        self.query.push((name, value));
        self
    }

    pub fn as_text(mut self) -> Self {
        self.format = ResponseFormat::Text;
        self
    }

    pub fn render(&self, vars: &TemplateVars) -> Request {
        let pairs = |fields: &[(&'static str, &'static str)]| -> Vec<(String, String)> {
            fields
                .iter()
                .map(|(k, v)| ((*k).to_owned(), vars.render(v)))
                .collect()
        };
        let body = match &self.body {
            TemplateBody::None => RequestBody::None,
            TemplateBody::Form(fields) => RequestBody::Form(pairs(fields)),
            TemplateBody::Json(fields) => RequestBody::Json(Value::Object(
                pairs(fields)
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect::<Map<String, Value>>(),
            )),
        };
        Request {
            method: self.method,
            path: vars.render(self.path),
            query: pairs(&self.query),
            body,
            format: self.format,
        }
    }
}

// ── Profile parts ───────────────────────────────────────────────────

/// One status request. Several keyed requests are merged into one object
/// `{key: payload, ...}` before mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRequest {
    pub key: Option<&'static str>,
    pub request: RequestTemplate,
}

/// A status field saying the device itself is unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineMarker {
    pub check: FieldMatch,
    pub reason: &'static str,
}

/// Anchor-scraped id list, optionally translated (numeric → alphabetic
/// currency codes).
#[derive(Debug, Clone, Copy)]
pub struct AnchorSource {
    pub rule: ExtractionRule,
    pub translate: Option<fn(&str) -> Option<&'static str>>,
}

#[derive(Debug, Clone)]
pub enum DiscoverySource {
    Json {
        /// Path of the device list; empty for a top-level array.
        list_path: &'static str,
        id_field: &'static str,
        name_field: Option<&'static str>,
        type_field: Option<&'static str>,
        filter: Option<FieldMatch>,
    },
    /// Scrape ids from an HTML page. Rules are tried in order; the first
    /// that finds anything wins.
    Anchors(Vec<AnchorSource>),
}

#[derive(Debug, Clone)]
pub struct DiscoveryProfile {
    pub request: RequestTemplate,
    pub source: DiscoverySource,
    /// Supported device types; empty allows all.
    pub allowed_types: Vec<&'static str>,
    /// Type reported when the source carries none.
    pub default_type: &'static str,
    /// Property carrying the external id.
    pub id_property: &'static str,
    /// Extra `(property, path)` pairs copied from list items.
    pub properties: Vec<(&'static str, &'static str)>,
}

/// Control endpoint for channels whose id starts with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRoute {
    pub prefix: &'static str,
    pub kind: ChannelKind,
    pub request: RequestTemplate,
}

/// How a thing selects its part of a shared payload.
#[derive(Debug, Clone, Copy)]
pub enum SegmentKey {
    /// The configured device id names a section.
    Device,
    /// The configured currency, translated to the id used on the page.
    Currency(fn(&str) -> Option<&'static str>),
}

/// Everything that makes one vendor different from another.
#[derive(Debug, Clone)]
pub struct BindingProfile {
    pub vendor: &'static str,
    pub description: &'static str,
    pub base_url: &'static str,
    pub user_agent: Option<&'static str>,
    pub accept_language: Option<&'static str>,
    pub default_headers: Vec<(&'static str, &'static str)>,
    pub auth: Arc<AuthScheme>,
    /// Sent before every status or control request (service selection).
    pub prepare: Option<RequestTemplate>,
    pub status: Vec<StatusRequest>,
    /// Status requests name a device; things without one are misconfigured.
    pub status_needs_device: bool,
    pub mapping: MappingTable,
    /// IANA zone vendor timestamps are read in.
    pub timezone: &'static str,
    pub offline_marker: Option<OfflineMarker>,
    /// "In service mode" flag, honoured only when the thing opts in.
    pub service_marker: Option<FieldMatch>,
    pub segment: Option<SegmentKey>,
    pub discovery: Option<DiscoveryProfile>,
    pub commands: Vec<CommandRoute>,
    pub default_refresh: Duration,
}

impl BindingProfile {
    pub fn command_route(&self, channel: &str) -> Option<&CommandRoute> {
        self.commands.iter().find(|r| channel.starts_with(r.prefix))
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Every built-in profile.
pub fn profiles() -> [&'static BindingProfile; 5] {
    [
        &*efergy::PROFILE,
        &*goodwe::PROFILE,
        &*jablotron::PROFILE,
        &*mintos::PROFILE,
        &*zonky::PROFILE,
    ]
}

/// Find a profile by vendor name (case-insensitive).
pub fn lookup_profile(vendor: &str) -> Option<&'static BindingProfile> {
    profiles()
        .into_iter()
        .find(|p| p.vendor.eq_ignore_ascii_case(vendor.trim()))
}
