// ── Runtime thing configuration ──
//
// What a handler needs to run one monitored thing. Built by the host (or
// by cloudpoll-config from a TOML profile) and handed in; the core never
// reads configuration files.

use std::time::Duration;

use chrono::FixedOffset;
use cloudpoll_api::Credentials;
use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// Configuration for a single monitored thing.
#[derive(Debug, Clone)]
pub struct ThingConfig {
    /// Host-side identifier, used in every sink call and log line.
    pub thing_id: String,
    /// Vendor profile name (`jablotron`, `goodwe`, ...).
    pub vendor: String,
    /// Overrides the profile's base URL (tests, regional endpoints).
    pub base_url: Option<Url>,
    pub credentials: Credentials,
    /// Vendor-side device id (service id, power station id).
    pub device_id: Option<String>,
    /// Vendor-side device type tag (`ja100`, `oasis`).
    pub device_type: Option<String>,
    /// User code sent with control requests (alarm panels).
    pub control_code: Option<SecretString>,
    pub refresh_interval: Duration,
    pub initial_delay: Duration,
    pub timeout: Duration,
    /// Consecutive failed ticks before the thing goes offline.
    pub failure_threshold: u32,
    /// Run the discovery sub-loop for this thing.
    pub discovery: bool,
    pub discovery_interval: Duration,
    pub discovery_initial_delay: Duration,
    /// Delay before retrying a discovery scan skipped while offline.
    pub offline_retry_delay: Duration,
    /// Overrides the profile's time zone for vendor timestamps.
    pub utc_offset: Option<FixedOffset>,
    pub lang: Option<String>,
    /// Account/currency filter (ISO-4217 alphabetic code).
    pub currency: Option<String>,
    /// Overrides the profile's hourly re-login.
    pub relogin_every_hour: Option<bool>,
    /// Trust the vendor's "in service" flag on status responses.
    pub honor_service_flag: bool,
    pub user_agent: Option<String>,
}

impl ThingConfig {
    pub fn new(
        thing_id: impl Into<String>,
        vendor: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            thing_id: thing_id.into(),
            vendor: vendor.into(),
            base_url: None,
            credentials,
            device_id: None,
            device_type: None,
            control_code: None,
            refresh_interval: Duration::from_secs(60),
            initial_delay: Duration::ZERO,
            timeout: Duration::from_secs(10),
            failure_threshold: 1,
            discovery: false,
            discovery_interval: Duration::from_secs(3600),
            discovery_initial_delay: Duration::from_secs(10),
            offline_retry_delay: Duration::from_secs(60),
            utc_offset: None,
            lang: None,
            currency: None,
            relogin_every_hour: None,
            honor_service_flag: false,
            user_agent: None,
        }
    }

    /// Check the values the engine depends on.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.thing_id.trim().is_empty() {
            return Err(CoreError::Config {
                message: "thing id must not be empty".into(),
            });
        }
        if self.refresh_interval.is_zero() {
            return Err(CoreError::Config {
                message: "refresh interval must be positive".into(),
            });
        }
        if self.discovery && self.discovery_interval.is_zero() {
            return Err(CoreError::Config {
                message: "discovery interval must be positive".into(),
            });
        }
        if self.failure_threshold == 0 {
            return Err(CoreError::Config {
                message: "failure threshold must be at least 1".into(),
            });
        }
        if self.timeout.is_zero() {
            return Err(CoreError::Config {
                message: "timeout must be positive".into(),
            });
        }
        Ok(())
    }
}
