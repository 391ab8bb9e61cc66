//! Mintos investment accounts, scraped from the HTML overview page.
//!
//! Login is a CSRF-protected form; the session lives in cookies. The
//! overview page carries one tab per currency account (`bindTabs('978'`
//! for EUR), so a thing picks its account through the configured currency.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use cloudpoll_api::auth::{
    ExpiryPolicy, GrantSource, LoginFlow, LoginRequest, LogoutRequest, PreLogin, TokenSource,
};
use cloudpoll_api::envelope::{BodyEncoding, Method};
use cloudpoll_api::{AuthScheme, ExtractionRule, Terminator, TokenPlacement};

use super::{
    AnchorSource, BindingProfile, DiscoveryProfile, DiscoverySource, RequestTemplate, SegmentKey,
    StatusRequest,
};
use crate::mapper::{HtmlRule, MappingTable, SegmentBounds};
use crate::model::ChannelKind;

// ── Extraction rules ────────────────────────────────────────────────

pub const MINTOS_CSRF_V1: ExtractionRule =
    ExtractionRule::new("MINTOS_CSRF", 1, "token=\"", Terminator::Length(43));

pub const MINTOS_CSRF_V0: ExtractionRule =
    ExtractionRule::new("MINTOS_CSRF", 0, "_csrf_token\" value=\"", Terminator::Length(43));

/// Yields the query string of the logout link.
pub const MINTOS_LOGOUT_URL_V1: ExtractionRule = ExtractionRule::new(
    "MINTOS_LOGOUT_URL",
    1,
    "<a href=\"https://www.mintos.com/en/logout?",
    Terminator::Anchor("\" class=\"logout main-nav-logout"),
);

pub const MINTOS_ACCOUNT_V1: ExtractionRule =
    ExtractionRule::new("MINTOS_ACCOUNT", 1, "<span title=\"", Terminator::Length(3));

pub const MINTOS_BALANCE_V1: ExtractionRule =
    ExtractionRule::new("MINTOS_BALANCE", 1, "bindTabs('", Terminator::Length(3));

// ── Currencies ──────────────────────────────────────────────────────

/// ISO-4217 numeric and alphabetic codes of the currencies Mintos offers.
pub const CURRENCIES: [(&str, &str); 12] = [
    ("203", "CZK"),
    ("208", "DKK"),
    ("398", "KZT"),
    ("484", "MXN"),
    ("643", "RUB"),
    ("752", "SEK"),
    ("826", "GBP"),
    ("840", "USD"),
    ("946", "RON"),
    ("978", "EUR"),
    ("981", "GEL"),
    ("985", "PLN"),
];

pub fn currency_alpha(numeric: &str) -> Option<&'static str> {
    CURRENCIES
        .iter()
        .find(|(n, _)| *n == numeric.trim())
        .map(|(_, alpha)| *alpha)
}

pub fn currency_numeric(alpha: &str) -> Option<&'static str> {
    CURRENCIES
        .iter()
        .find(|(_, a)| a.eq_ignore_ascii_case(alpha.trim()))
        .map(|(numeric, _)| *numeric)
}

// ── Profile ─────────────────────────────────────────────────────────

/// `<label></td><td>value</td>` table cell. `start` includes the label.
fn cell(start: &'static str, channel: &'static str) -> HtmlRule {
    HtmlRule {
        after: None,
        rule: ExtractionRule::new(channel, 1, start, Terminator::Anchor("</td>")),
        channel,
        kind: ChannelKind::Number,
    }
}

fn tooltip_cell(label: &'static str, channel: &'static str) -> HtmlRule {
    HtmlRule {
        after: Some(label),
        rule: ExtractionRule::new(channel, 1, "</i></td><td>", Terminator::Anchor("</td>")),
        channel,
        kind: ChannelKind::Number,
    }
}

fn html_rules() -> Vec<HtmlRule> {
    vec![
        cell("Total</td><td>", "account_balance"),
        cell("Available Funds</td><td>", "available_funds"),
        cell("Invested Funds</td><td>", "invested_funds"),
        HtmlRule {
            after: Some("Net Annual Return"),
            rule: ExtractionRule::new(
                "net_annual_return",
                1,
                "<div class=\"value\">",
                Terminator::Anchor("</div>"),
            ),
            channel: "net_annual_return",
            kind: ChannelKind::Number,
        },
        cell("Interest</td><td>", "interest"),
        cell("Late Payment Fees</td><td>", "late_payment_fees"),
        cell("Bad Debt</td><td>", "bad_debt"),
        tooltip_cell("Secondary Market Transactions", "secondary_market_transactions"),
        tooltip_cell("Service Fees", "service_fees"),
        cell("Campaign Rewards</td><td>", "campaign_rewards"),
        cell("Total Profit</td><td>", "total_profit"),
    ]
}

pub static PROFILE: LazyLock<BindingProfile> = LazyLock::new(|| BindingProfile {
    vendor: "mintos",
    description: "Mintos P2P lending accounts (HTML overview)",
    base_url: "https://www.mintos.com/",
    user_agent: Some(
        "Mozilla/5.0 (Windows NT 6.1; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/66.0.3359.117 Safari/537.36",
    ),
    accept_language: None,
    default_headers: Vec::new(),
    auth: Arc::new(AuthScheme {
        login: LoginFlow::Request(LoginRequest {
            pre_login: Some(PreLogin {
                path: "en/login",
                rules: vec![MINTOS_CSRF_V1, MINTOS_CSRF_V0],
                field: "_csrf_token",
            }),
            path: "en/login/check",
            encoding: BodyEncoding::Form,
            login_field: "_username",
            password_field: "_password",
            extra_fields: Vec::new(),
            headers: vec![("Origin", "https://www.mintos.com")],
            grant: GrantSource::new(TokenSource::Cookie),
            success: None,
        }),
        refresh: None,
        logout: Some(LogoutRequest {
            method: Method::Get,
            path: "en/overview",
            link_rule: Some(MINTOS_LOGOUT_URL_V1),
            link_prefix: "en/logout?",
        }),
        placement: TokenPlacement::CookieJar,
        // Cookie sessions give no expiry hint; log in again periodically.
        expiry: ExpiryPolicy::Ttl(Duration::from_secs(30 * 60)),
        expired_markers: Vec::new(),
        envelope: None,
    }),
    prepare: None,
    status: vec![StatusRequest {
        key: None,
        request: RequestTemplate::get("en/overview").as_text(),
    }],
    status_needs_device: false,
    mapping: MappingTable {
        html: html_rules(),
        segment: Some(SegmentBounds {
            start: "bindTabs('{id}",
            end: "Recent News",
        }),
        ..MappingTable::default()
    },
    timezone: "UTC",
    offline_marker: None,
    service_marker: None,
    segment: Some(SegmentKey::Currency(currency_numeric)),
    discovery: Some(DiscoveryProfile {
        request: RequestTemplate::get("en/overview").as_text(),
        source: DiscoverySource::Anchors(vec![
            AnchorSource {
                rule: MINTOS_ACCOUNT_V1,
                translate: None,
            },
            AnchorSource {
                rule: MINTOS_BALANCE_V1,
                translate: Some(currency_alpha),
            },
        ]),
        allowed_types: Vec::new(),
        default_type: "account",
        id_property: "currency",
        properties: Vec::new(),
    }),
    commands: Vec::new(),
    default_refresh: Duration::from_secs(600),
});
