use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Status of a monitored thing as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason")]
pub enum ThingStatus {
    Uninitialized,
    Online,
    /// Communication failed; the reason is a short human-readable detail.
    Offline(String),
    /// Credentials missing or refused. Polling continues but will not
    /// recover until the configuration changes.
    ConfigurationError(String),
    /// Terminal.
    Disposed,
}

impl ThingStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for ThingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("UNINITIALIZED"),
            Self::Online => f.write_str("ONLINE"),
            Self::Offline(reason) => write!(f, "OFFLINE ({reason})"),
            Self::ConfigurationError(reason) => write!(f, "CONFIGURATION_ERROR ({reason})"),
            Self::Disposed => f.write_str("DISPOSED"),
        }
    }
}

/// A child device found by a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub external_id: String,
    pub display_name: String,
    pub device_type: String,
    pub properties: BTreeMap<String, String>,
}
