//! Jablotron JA-100 / OASIS alarm panels via the jablonet.net web portal.
//!
//! The portal keeps the session in cookies and drops it every hour, so the
//! profile forces a re-login at each wall-clock hour. A status request only
//! answers for the service selected last, hence the `prepare` request.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use cloudpoll_api::auth::{
    ExpiryPolicy, GrantSource, LoginFlow, LoginRequest, LogoutRequest, TokenSource,
};
use cloudpoll_api::envelope::{BodyEncoding, Expected, FieldMatch, Method, StatusCheck};
use cloudpoll_api::{AuthScheme, TokenPlacement};

use super::{
    BindingProfile, CommandRoute, DiscoveryProfile, DiscoverySource, RequestTemplate,
    StatusRequest,
};
use crate::mapper::{FieldRule, MappingTable, SectionId, SectionRule, Transform};
use crate::model::ChannelKind;

/// `status` values in every portal response.
pub const STATUS_OK: i64 = 200;
pub const STATUS_BUSY: i64 = 201;
pub const STATUS_BAD_LOGIN: i64 = 300;
pub const STATUS_NO_SESSION: i64 = 800;

fn envelope() -> StatusCheck {
    StatusCheck {
        path: "status",
        ok: vec![Expected::Int(STATUS_OK)],
        rejected: vec![Expected::Int(STATUS_BAD_LOGIN)],
        message_path: Some("error_message"),
    }
}

fn section(path: &'static str, kind: ChannelKind) -> SectionRule {
    SectionRule {
        path,
        id: SectionId::Field("stateName"),
        channel: "{id}",
        label: Some("nazev"),
        value: "stav",
        kind,
        transform: Transform::None,
        filter: None,
    }
}

pub static PROFILE: LazyLock<BindingProfile> = LazyLock::new(|| BindingProfile {
    vendor: "jablotron",
    description: "Jablotron JA-100 / OASIS alarm panels (jablonet.net)",
    base_url: "https://www.jablonet.net/",
    user_agent: Some("Swagger-Codegen/1.0.0/android"),
    accept_language: Some("cs-CZ"),
    default_headers: vec![("X-Requested-With", "XMLHttpRequest")],
    auth: Arc::new(AuthScheme {
        login: LoginFlow::Request(LoginRequest {
            pre_login: None,
            path: "ajax/login.php",
            encoding: BodyEncoding::Form,
            login_field: "login",
            password_field: "heslo",
            extra_fields: vec![("aStatus", "200"), ("loginType", "Login")],
            headers: Vec::new(),
            grant: GrantSource::new(TokenSource::Cookie),
            success: Some(envelope()),
        }),
        refresh: None,
        logout: Some(LogoutRequest {
            method: Method::Get,
            path: "logout",
            link_rule: None,
            link_prefix: "",
        }),
        placement: TokenPlacement::CookieJar,
        expiry: ExpiryPolicy::HourBoundary,
        expired_markers: vec![FieldMatch::new("status", Expected::Int(STATUS_NO_SESSION))],
        envelope: Some(envelope()),
    }),
    prepare: Some(RequestTemplate::get("app/{device_type}").with_query("service", "{device}").as_text()),
    status: vec![StatusRequest {
        key: None,
        request: RequestTemplate::get("app/{device_type}/ajax/stav.php"),
    }],
    status_needs_device: true,
    mapping: MappingTable {
        fields: vec![FieldRule::new("isAlarm", "alarm", ChannelKind::Switch)],
        sections: vec![
            section("sekce", ChannelKind::Number),
            section("pgm", ChannelKind::Switch),
            SectionRule {
                label: None,
                value: "value",
                ..section("teplomery", ChannelKind::Number)
            },
        ],
        html: Vec::new(),
        segment: None,
        check_time_channel: Some("lastCheckTime"),
    },
    timezone: "Europe/Prague",
    offline_marker: None,
    service_marker: Some(FieldMatch::new("service", Expected::Int(1))),
    segment: None,
    discovery: Some(DiscoveryProfile {
        request: RequestTemplate::get("ajax/widget-new.php"),
        source: DiscoverySource::Json {
            list_path: "widget",
            id_field: "id",
            name_field: Some("name"),
            type_field: Some("templateService"),
            filter: None,
        },
        allowed_types: vec!["oasis", "ja100", "ja100f"],
        default_type: "ja100",
        id_property: "service",
        properties: vec![("url", "url")],
    }),
    commands: vec![
        CommandRoute {
            prefix: "PGM_",
            kind: ChannelKind::Switch,
            request: RequestTemplate::post_form(
                "app/{device_type}/ajax/ovladani2.php",
                vec![("section", "{channel}"), ("status", "{value}"), ("code", "{code}")],
            ),
        },
        CommandRoute {
            prefix: "STATE_",
            kind: ChannelKind::Text,
            request: RequestTemplate::post_form(
                "app/{device_type}/ajax/ovladani2.php",
                vec![("section", "{channel}"), ("status", ""), ("code", "{value}")],
            ),
        },
    ],
    default_refresh: Duration::from_secs(60),
});
