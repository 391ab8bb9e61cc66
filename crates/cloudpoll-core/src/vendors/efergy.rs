//! Efergy Engage energy monitors.
//!
//! Authenticated by an application token passed as `?token=`. The hub
//! answers with every sensor at once; a sensor thing (device id = `sid`)
//! only takes its own section, a hub thing takes everything.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use cloudpoll_api::envelope::{Expected, FieldMatch};
use cloudpoll_api::{AuthScheme, TokenPlacement};

use super::{
    BindingProfile, DiscoveryProfile, DiscoverySource, RequestTemplate, SegmentKey, StatusRequest,
};
use crate::mapper::{FieldRule, MappingTable, SectionId, SectionRule, Transform};
use crate::model::ChannelKind;

/// Sensor class of power clamps; other classes are ignored.
pub const POWER_SENSOR: &str = "PWER";

fn power_only() -> Option<FieldMatch> {
    Some(FieldMatch::new("cid", Expected::Str(POWER_SENSOR)))
}

fn energy(period: &'static str) -> RequestTemplate {
    RequestTemplate::get("getEnergy")
        .with_query("period", period)
        .with_query("offset", "{utc_offset}")
}

pub static PROFILE: LazyLock<BindingProfile> = LazyLock::new(|| BindingProfile {
    vendor: "efergy",
    description: "Efergy Engage energy monitors",
    base_url: "https://engage.efergy.com/mobile_proxy/",
    user_agent: None,
    accept_language: None,
    default_headers: Vec::new(),
    auth: Arc::new(AuthScheme::static_token(TokenPlacement::Query("token"))),
    prepare: None,
    status: vec![
        StatusRequest {
            key: Some("current"),
            request: RequestTemplate::get("getCurrentValuesSummary"),
        },
        StatusRequest {
            key: Some("forecast"),
            request: RequestTemplate::get("getForecast")
                .with_query("dataType", "cost")
                .with_query("period", "month")
                .with_query("offset", "{utc_offset}"),
        },
        StatusRequest {
            key: Some("day"),
            request: energy("day"),
        },
        StatusRequest {
            key: Some("week"),
            request: energy("week"),
        },
        StatusRequest {
            key: Some("month"),
            request: energy("month"),
        },
        StatusRequest {
            key: Some("year"),
            request: energy("year"),
        },
    ],
    status_needs_device: false,
    mapping: MappingTable {
        fields: vec![
            FieldRule::new("forecast.month_tariff.estimate", "estimate", ChannelKind::Number),
            FieldRule::new("forecast.month_tariff.previousSum", "cost", ChannelKind::Number),
            FieldRule::new("day.sum", "daytotal", ChannelKind::Number),
            FieldRule::new("week.sum", "weektotal", ChannelKind::Number),
            FieldRule::new("month.sum", "monthtotal", ChannelKind::Number),
            FieldRule::new("year.sum", "yeartotal", ChannelKind::Number),
        ],
        sections: vec![
            SectionRule {
                path: "current",
                id: SectionId::Field("sid"),
                channel: "instant_{id}",
                label: None,
                // `data` is `[{"<epoch ms>": <watts>}]`
                value: "data.0.*",
                kind: ChannelKind::Number,
                transform: Transform::None,
                filter: power_only(),
            },
            SectionRule {
                path: "current",
                id: SectionId::Field("sid"),
                channel: "last_measurement_{id}",
                label: None,
                value: "age",
                kind: ChannelKind::Timestamp,
                transform: Transform::AgeSeconds,
                filter: power_only(),
            },
        ],
        ..MappingTable::default()
    },
    timezone: "UTC",
    offline_marker: None,
    service_marker: None,
    segment: Some(SegmentKey::Device),
    discovery: Some(DiscoveryProfile {
        request: RequestTemplate::get("getCurrentValuesSummary"),
        source: DiscoverySource::Json {
            list_path: "",
            id_field: "sid",
            name_field: None,
            type_field: None,
            filter: power_only(),
        },
        allowed_types: Vec::new(),
        default_type: "sensor",
        id_property: "sid",
        properties: vec![("units", "units")],
    }),
    commands: Vec::new(),
    default_refresh: Duration::from_secs(30),
});
