//! GoodWe photovoltaic plants via the SEMS portal.
//!
//! Login returns a token plus `uid` and `timestamp`; all three are echoed
//! back in a JSON-encoded `token` header on every later request.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use cloudpoll_api::auth::{ExpiryPolicy, GrantSource, LoginFlow, LoginRequest, TokenSource};
use cloudpoll_api::envelope::{BodyEncoding, Expected, FieldMatch, StatusCheck};
use cloudpoll_api::{AuthScheme, TokenPlacement};

use super::{
    BindingProfile, DiscoveryProfile, DiscoverySource, OfflineMarker, RequestTemplate,
    StatusRequest,
};
use crate::mapper::{FieldRule, MappingTable};
use crate::model::ChannelKind;

pub const AUTHORIZATION_EXPIRED: &str = "The authorization has expired, please login again.";

const CLIENT_HEADER: &str = r#"{"version":"v2.0.4","client":"ios","language":"en"}"#;

fn envelope() -> StatusCheck {
    StatusCheck {
        path: "code",
        ok: vec![Expected::Int(0)],
        rejected: Vec::new(),
        message_path: Some("msg"),
    }
}

const fn number(path: &'static str, channel: &'static str) -> FieldRule {
    FieldRule::new(path, channel, ChannelKind::Number)
}

pub static PROFILE: LazyLock<BindingProfile> = LazyLock::new(|| BindingProfile {
    vendor: "goodwe",
    description: "GoodWe PV plants (SEMS portal)",
    base_url: "https://eu.semsportal.com/api/",
    user_agent: Some("PVMaster/2.0.4 (iPhone; iOS 11.4.1; Scale/2.00)"),
    accept_language: None,
    default_headers: Vec::new(),
    auth: Arc::new(AuthScheme {
        login: LoginFlow::Request(LoginRequest {
            pre_login: None,
            path: "v1/Common/CrossLogin",
            encoding: BodyEncoding::Json,
            login_field: "account",
            password_field: "pwd",
            extra_fields: Vec::new(),
            headers: vec![("token", CLIENT_HEADER)],
            grant: GrantSource {
                token: TokenSource::JsonField("data.token"),
                refresh_token: None,
                extras: vec![("uid", "data.uid"), ("timestamp", "data.timestamp")],
            },
            success: Some(envelope()),
        }),
        refresh: None,
        logout: None,
        placement: TokenPlacement::HeaderTemplate {
            name: "token",
            template: r#"{"version":"v2.0.4","client":"ios","language":"en","timestamp":{timestamp},"uid":"{uid}","token":"{token}"}"#,
        },
        expiry: ExpiryPolicy::Never,
        expired_markers: vec![FieldMatch::new("msg", Expected::Str(AUTHORIZATION_EXPIRED))],
        envelope: Some(envelope()),
    }),
    prepare: None,
    status: vec![StatusRequest {
        key: None,
        request: RequestTemplate::post_json(
            "v1/PowerStation/GetMonitorDetailByPowerstationId",
            vec![("PowerStationId", "{device}")],
        ),
    }],
    status_needs_device: true,
    mapping: MappingTable {
        fields: vec![
            number("data.info.capacity", "capacity"),
            number("data.info.battery_capacity", "battery_capacity"),
            number("data.kpi.pac", "pac"),
            number("data.kpi.power", "power"),
            number("data.kpi.total_power", "total_power"),
            number("data.kpi.day_income", "day_income"),
            number("data.kpi.total_income", "total_income"),
            number("data.energeStatisticsCharts.sum", "sum"),
            number("data.energeStatisticsCharts.buy", "buy"),
            number("data.energeStatisticsCharts.buyPercent", "buy_percent"),
            number("data.energeStatisticsCharts.sell", "sell"),
            number("data.energeStatisticsCharts.sellPercent", "sell_percent"),
            number("data.energeStatisticsCharts.selfUseOfPv", "self_use_of_pv"),
            number("data.energeStatisticsCharts.consumptionOfLoad", "consumption_of_load"),
        ],
        ..MappingTable::default()
    },
    timezone: "UTC",
    offline_marker: Some(OfflineMarker {
        check: FieldMatch::new("data.info.status", Expected::Int(-1)),
        reason: "Status: -1",
    }),
    service_marker: None,
    segment: None,
    discovery: Some(DiscoveryProfile {
        request: RequestTemplate::post_json("PowerStationMonitor/QueryPowerStationMonitor", Vec::new()),
        source: DiscoverySource::Json {
            list_path: "data.list",
            id_field: "powerstation_id",
            name_field: Some("stationname"),
            type_field: None,
            filter: None,
        },
        allowed_types: Vec::new(),
        default_type: "powerstation",
        id_property: "id",
        properties: Vec::new(),
    }),
    commands: Vec::new(),
    default_refresh: Duration::from_secs(60),
});
