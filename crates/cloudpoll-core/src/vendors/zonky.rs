//! Zonky peer-to-peer lending accounts.
//!
//! OAuth password grant with a refresh token. One tick reads three
//! documents (wallet, statistics overview, weekly statistics); they are
//! merged under their keys before mapping, which gives channel groups
//! like `wallet#balance`.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use cloudpoll_api::auth::{
    ExpiryPolicy, GrantSource, LoginFlow, LoginRequest, LogoutRequest, RefreshRequest,
    TokenSource,
};
use cloudpoll_api::envelope::{BodyEncoding, Method};
use cloudpoll_api::{AuthScheme, TokenPlacement};

use super::{BindingProfile, RequestTemplate, StatusRequest};
use crate::mapper::{FieldRule, MappingTable};
use crate::model::ChannelKind;

const CLIENT_AUTH: (&str, &str) = ("Authorization", "Basic d2ViOndlYg==");
const SCOPE: (&str, &str) = ("scope", "SCOPE_APP_WEB");

fn grant() -> GrantSource {
    GrantSource {
        token: TokenSource::JsonField("access_token"),
        refresh_token: Some("refresh_token"),
        extras: Vec::new(),
    }
}

const fn number(path: &'static str, channel: &'static str) -> FieldRule {
    FieldRule::new(path, channel, ChannelKind::Number)
}

fn fields() -> Vec<FieldRule> {
    vec![
        // ── wallet ──
        number("wallet.balance", "wallet#balance"),
        number("wallet.availableBalance", "wallet#availableBalance"),
        number("wallet.blockedBalance", "wallet#blockedBalance"),
        number("wallet.creditSum", "wallet#creditSum"),
        number("wallet.debitSum", "wallet#debitSum"),
        // ── statistics (ratios reported as percent) ──
        number("statistics.currentProfitability", "statistics#currentProfitability").scaled(100.0),
        number("statistics.expectedProfitability", "statistics#expectedProfitability")
            .scaled(100.0),
        // ── current overview ──
        number("statistics.currentOverview.totalInvestment", "currentOverview#totalInvestment"),
        number("statistics.currentOverview.principalPaid", "currentOverview#principalPaid"),
        number("statistics.currentOverview.interestPaid", "currentOverview#interestPaid"),
        number("statistics.currentOverview.penaltyPaid", "currentOverview#penaltyPaid"),
        number("statistics.currentOverview.investmentCount", "currentOverview#investmentCount"),
        number("statistics.currentOverview.principalLeft", "currentOverview#principalLeft"),
        number(
            "statistics.currentOverview.principalLeftToPay",
            "currentOverview#principalLeftToPay",
        ),
        number("statistics.currentOverview.principalLeftDue", "currentOverview#principalLeftDue"),
        number("statistics.currentOverview.interestPlanned", "currentOverview#interestPlanned"),
        number("statistics.currentOverview.interestLeft", "currentOverview#interestLeft"),
        number(
            "statistics.currentOverview.interestLeftToPay",
            "currentOverview#interestLeftToPay",
        ),
        number("statistics.currentOverview.interestLeftDue", "currentOverview#interestLeftDue"),
        // ── overall overview ──
        number("statistics.overallOverview.totalInvestment", "overallOverview#totalInvestment"),
        number("statistics.overallOverview.principalPaid", "overallOverview#principalPaid"),
        number("statistics.overallOverview.interestPaid", "overallOverview#interestPaid"),
        number("statistics.overallOverview.penaltyPaid", "overallOverview#penaltyPaid"),
        number("statistics.overallOverview.investmentCount", "overallOverview#investmentCount"),
        number("statistics.overallOverview.feesAmount", "overallOverview#feesAmount"),
        number("statistics.overallOverview.feesDiscount", "overallOverview#feesDiscount"),
        number("statistics.overallOverview.netIncome", "overallOverview#netIncome"),
        number("statistics.overallOverview.principalLost", "overallOverview#principalLost"),
        // ── weekly statistics ──
        number("weekly.newInvestments", "weeklyStats#newInvestments"),
        number("weekly.newInvestmentsAmount", "weeklyStats#newInvestmentsAmount"),
        number("weekly.paidInstalments", "weeklyStats#paidInstalments"),
        number("weekly.paidInstalmentsAmount", "weeklyStats#paidInstalmentsAmount"),
        number("weekly.soldInvestments", "weeklyStats#soldInvestments"),
        number("weekly.soldInvestmentsAmount", "weeklyStats#soldInvestmentsAmount"),
        number("weekly.boughtInvestments", "weeklyStats#boughtInvestments"),
        number("weekly.boughtInvestmentsAmount", "weeklyStats#boughtInvestmentsAmount"),
    ]
}

pub static PROFILE: LazyLock<BindingProfile> = LazyLock::new(|| BindingProfile {
    vendor: "zonky",
    description: "Zonky P2P lending account",
    base_url: "https://api.zonky.cz/",
    user_agent: Some(
        "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/54.0.2840.59 Safari/537.36",
    ),
    accept_language: None,
    default_headers: Vec::new(),
    auth: Arc::new(AuthScheme {
        login: LoginFlow::Request(LoginRequest {
            pre_login: None,
            path: "oauth/token",
            encoding: BodyEncoding::Form,
            login_field: "username",
            password_field: "password",
            extra_fields: vec![("grant_type", "password"), SCOPE],
            headers: vec![CLIENT_AUTH],
            grant: grant(),
            success: None,
        }),
        refresh: Some(RefreshRequest {
            path: "oauth/token",
            encoding: BodyEncoding::Form,
            token_field: "refresh_token",
            extra_fields: vec![("grant_type", "refresh_token"), SCOPE],
            headers: vec![CLIENT_AUTH],
            grant: grant(),
        }),
        logout: Some(LogoutRequest {
            method: Method::Get,
            path: "users/me/logout",
            link_rule: None,
            link_prefix: "",
        }),
        placement: TokenPlacement::Bearer,
        expiry: ExpiryPolicy::FromField("expires_in"),
        expired_markers: Vec::new(),
        envelope: None,
    }),
    prepare: None,
    status: vec![
        StatusRequest {
            key: Some("wallet"),
            request: RequestTemplate::get("users/me/wallet"),
        },
        StatusRequest {
            key: Some("statistics"),
            request: RequestTemplate::get("statistics/overview"),
        },
        StatusRequest {
            key: Some("weekly"),
            request: RequestTemplate::get("statistics/weekly-statistics"),
        },
    ],
    status_needs_device: false,
    mapping: MappingTable {
        fields: fields(),
        ..MappingTable::default()
    },
    timezone: "Europe/Prague",
    offline_marker: None,
    service_marker: None,
    segment: None,
    discovery: None,
    commands: Vec::new(),
    default_refresh: Duration::from_secs(300),
});

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::mapper::{ResponseMapper, VendorZone};
    use crate::model::TypedValue;

    #[test]
    fn merged_documents_map_to_grouped_channels() {
        let mapper = ResponseMapper::new(PROFILE.mapping.clone(), VendorZone::default());
        let payload = json!({
            "wallet": {"balance": 1200.5, "availableBalance": 200, "blockedBalance": 0,
                       "creditSum": 5000, "debitSum": 3799.5},
            "statistics": {
                "currentProfitability": 0.0875,
                "expectedProfitability": 0.25,
                "currentOverview": {"totalInvestment": 1000},
                "overallOverview": {"netIncome": 87.5}
            },
            "weekly": {"newInvestments": 2}
        });
        let updates = mapper.map(&payload);
        let get = |id: &str| {
            updates
                .iter()
                .find(|u| u.channel_id == id)
                .map(|u| u.value.clone())
        };

        assert_eq!(get("wallet#balance"), Some(TypedValue::Number(1200.5)));
        assert_eq!(get("statistics#expectedProfitability"), Some(TypedValue::Number(25.0)));
        assert_eq!(get("currentOverview#totalInvestment"), Some(TypedValue::Number(1000.0)));
        assert_eq!(get("overallOverview#netIncome"), Some(TypedValue::Number(87.5)));
        assert_eq!(get("weeklyStats#newInvestments"), Some(TypedValue::Number(2.0)));
        assert_eq!(get("weeklyStats#soldInvestments"), None);
    }

    #[test]
    fn uses_refreshable_bearer_tokens() {
        assert!(PROFILE.auth.refresh.is_some());
        assert_eq!(PROFILE.auth.placement, TokenPlacement::Bearer);
        assert!(!PROFILE.status_needs_device);
    }
}
