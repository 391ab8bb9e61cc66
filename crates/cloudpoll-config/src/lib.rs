//! Configuration for cloudpoll hosts.
//!
//! A TOML file of named things (one vendor account each), layered with
//! `CLOUDPOLL_`-prefixed environment variables, resolved into the
//! `cloudpoll_core::ThingConfig` a handler runs with. Secrets may live in
//! the file or behind `*_env` indirections.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use cloudpoll_api::Credentials;
use cloudpoll_api::auth::LoginFlow;
use cloudpoll_core::{ThingConfig, lookup_profile};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for thing '{thing}'")]
    NoCredentials { thing: String },

    #[error("unknown vendor '{vendor}' for thing '{thing}'")]
    UnknownVendor { thing: String, vendor: String },

    #[error("no thing named '{thing}' in the configuration")]
    UnknownThing { thing: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Thing used when none is named on the command line.
    pub default_thing: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named things, one vendor account each.
    #[serde(default)]
    pub things: BTreeMap<String, ThingProfile>,
}

/// Values applied to every thing that does not set its own.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Poll interval, e.g. `"5m"`. Falls back to the vendor's default.
    pub refresh_interval: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout: String,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_discovery_interval")]
    pub discovery_interval: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            refresh_interval: None,
            timeout: default_timeout(),
            failure_threshold: default_failure_threshold(),
            discovery_interval: default_discovery_interval(),
        }
    }
}

fn default_timeout() -> String {
    "10s".into()
}
fn default_failure_threshold() -> u32 {
    1
}
fn default_discovery_interval() -> String {
    "1h".into()
}

/// One monitored vendor account.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ThingProfile {
    /// Vendor profile name (`jablotron`, `goodwe`, ...).
    pub vendor: String,

    /// Override of the vendor's API root.
    pub base_url: Option<String>,

    pub login: Option<String>,

    /// Plaintext password. Prefer `password_env`.
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// Plaintext application token for token vendors.
    pub token: Option<String>,

    pub token_env: Option<String>,

    /// Code sent with alarm-panel control requests.
    pub control_code: Option<String>,

    pub control_code_env: Option<String>,

    pub device_id: Option<String>,
    pub device_type: Option<String>,

    pub refresh_interval: Option<String>,
    pub initial_delay: Option<String>,
    pub timeout: Option<String>,
    pub failure_threshold: Option<u32>,

    /// Scan for child devices (bridges only).
    #[serde(default)]
    pub discovery: bool,
    pub discovery_interval: Option<String>,

    /// Minutes east of UTC, used for vendor timestamps and date ranges.
    pub utc_offset_minutes: Option<i32>,
    pub lang: Option<String>,
    pub currency: Option<String>,
    pub relogin_every_hour: Option<bool>,

    #[serde(default)]
    pub honor_service_flag: bool,
    pub user_agent: Option<String>,
}

impl ThingProfile {
    /// Copy with every secret replaced by a placeholder, for display.
    pub fn redacted(&self) -> Self {
        let hide = |value: &Option<String>| value.as_ref().map(|_| "********".to_owned());
        Self {
            password: hide(&self.password),
            token: hide(&self.token),
            control_code: hide(&self.control_code),
            ..self.clone()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "cloudpoll", "cloudpoll").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("cloudpoll");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the configuration from the platform path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the configuration from `path` plus environment. A missing file
/// yields the defaults.
///
/// Environment keys nest with `__`, e.g.
/// `CLOUDPOLL_THINGS__HOME__PASSWORD`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CLOUDPOLL_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

impl Config {
    /// Name of the thing to use when the caller named none.
    pub fn default_thing_name(&self) -> Option<&str> {
        self.default_thing
            .as_deref()
            .or_else(|| match self.things.len() {
                1 => self.things.keys().next().map(String::as_str),
                _ => None,
            })
    }

    pub fn thing(&self, name: &str) -> Result<&ThingProfile, ConfigError> {
        self.things.get(name).ok_or_else(|| ConfigError::UnknownThing {
            thing: name.to_owned(),
        })
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the credentials of `profile` from the process environment and
/// the file.
pub fn resolve_credentials(
    profile: &ThingProfile,
    thing: &str,
    token_vendor: bool,
) -> Result<Credentials, ConfigError> {
    resolve_credentials_with(profile, thing, token_vendor, |name| std::env::var(name).ok())
}

/// [`resolve_credentials`] with an explicit environment lookup.
///
/// Order: the `*_env` variable, then the plaintext value.
pub fn resolve_credentials_with(
    profile: &ThingProfile,
    thing: &str,
    token_vendor: bool,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, ConfigError> {
    let no_credentials = || ConfigError::NoCredentials {
        thing: thing.to_owned(),
    };

    if token_vendor {
        let token = secret(profile.token_env.as_deref(), profile.token.as_ref(), &env)
            .ok_or_else(no_credentials)?;
        return Ok(Credentials::Token(token));
    }

    let login = profile
        .login
        .clone()
        .filter(|login| !login.trim().is_empty())
        .ok_or_else(no_credentials)?;
    let password = secret(profile.password_env.as_deref(), profile.password.as_ref(), &env)
        .ok_or_else(no_credentials)?;
    Ok(Credentials::Password { login, password })
}

fn secret(
    env_name: Option<&str>,
    plaintext: Option<&String>,
    env: &impl Fn(&str) -> Option<String>,
) -> Option<SecretString> {
    env_name
        .and_then(env)
        .or_else(|| plaintext.cloned())
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

// ── Translation to ThingConfig ──────────────────────────────────────

/// Build the runtime config for the thing called `name`.
pub fn resolve_thing_config(config: &Config, name: &str) -> Result<ThingConfig, ConfigError> {
    resolve_thing_config_with(config, name, |var| std::env::var(var).ok())
}

/// [`resolve_thing_config`] with an explicit environment lookup.
pub fn resolve_thing_config_with(
    config: &Config,
    name: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ThingConfig, ConfigError> {
    let profile = config.thing(name)?;
    let vendor = lookup_profile(&profile.vendor).ok_or_else(|| ConfigError::UnknownVendor {
        thing: name.to_owned(),
        vendor: profile.vendor.clone(),
    })?;

    let token_vendor = matches!(vendor.auth.login, LoginFlow::StaticToken);
    let credentials = resolve_credentials_with(profile, name, token_vendor, &env)?;

    let mut thing = ThingConfig::new(name, vendor.vendor, credentials);
    thing.base_url = profile
        .base_url
        .as_deref()
        .map(|raw| {
            url::Url::parse(raw).map_err(|e| ConfigError::Validation {
                field: "base_url".into(),
                reason: format!("invalid URL '{raw}': {e}"),
            })
        })
        .transpose()?;
    thing.device_id.clone_from(&profile.device_id);
    thing.device_type.clone_from(&profile.device_type);
    thing.control_code = secret(
        profile.control_code_env.as_deref(),
        profile.control_code.as_ref(),
        &env,
    );

    thing.refresh_interval = match profile
        .refresh_interval
        .as_deref()
        .or(config.defaults.refresh_interval.as_deref())
    {
        Some(raw) => duration("refresh_interval", raw)?,
        None => vendor.default_refresh,
    };
    if let Some(raw) = &profile.initial_delay {
        thing.initial_delay = duration("initial_delay", raw)?;
    }
    thing.timeout = duration(
        "timeout",
        profile.timeout.as_deref().unwrap_or(&config.defaults.timeout),
    )?;
    thing.failure_threshold = profile
        .failure_threshold
        .unwrap_or(config.defaults.failure_threshold);

    thing.discovery = profile.discovery;
    thing.discovery_interval = duration(
        "discovery_interval",
        profile
            .discovery_interval
            .as_deref()
            .unwrap_or(&config.defaults.discovery_interval),
    )?;

    thing.utc_offset = profile
        .utc_offset_minutes
        .map(|minutes| {
            FixedOffset::east_opt(minutes * 60).ok_or_else(|| ConfigError::Validation {
                field: "utc_offset_minutes".into(),
                reason: format!("{minutes} is out of range"),
            })
        })
        .transpose()?;
    thing.lang.clone_from(&profile.lang);
    thing.currency.clone_from(&profile.currency);
    thing.relogin_every_hour = profile.relogin_every_hour;
    thing.honor_service_flag = profile.honor_service_flag;
    thing.user_agent.clone_from(&profile.user_agent);

    thing.validate().map_err(|e| ConfigError::Validation {
        field: name.to_owned(),
        reason: e.to_string(),
    })?;
    Ok(thing)
}

fn duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::Validation {
        field: field.to_owned(),
        reason: format!("'{raw}': {e}"),
    })
}
