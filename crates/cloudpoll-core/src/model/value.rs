use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use strum::{Display, EnumString};

/// Type of a channel, deciding how raw vendor values are converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChannelKind {
    Number,
    Switch,
    Text,
    Timestamp,
}

/// A channel state value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TypedValue {
    Number(f64),
    Switch(bool),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
}

impl TypedValue {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Number(_) => ChannelKind::Number,
            Self::Switch(_) => ChannelKind::Switch,
            Self::Text(_) => ChannelKind::Text,
            Self::Timestamp(_) => ChannelKind::Timestamp,
        }
    }

    /// Parse the display form produced by `Display` back into a value.
    ///
    /// `Display` followed by `parse_display` yields the same logical value
    /// for every kind.
    pub fn parse_display(kind: ChannelKind, text: &str) -> Option<Self> {
        match kind {
            ChannelKind::Number => text.trim().parse().ok().map(Self::Number),
            ChannelKind::Switch => match text.trim() {
                "ON" => Some(Self::Switch(true)),
                "OFF" => Some(Self::Switch(false)),
                _ => None,
            },
            ChannelKind::Text => Some(Self::Text(text.to_owned())),
            ChannelKind::Timestamp => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(Self::Timestamp),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Switch(true) => f.write_str("ON"),
            Self::Switch(false) => f.write_str("OFF"),
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
        }
    }
}

/// A command sent by the host to a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Re-read the channel's state now.
    Refresh,
    Switch(bool),
    Number(f64),
    Text(String),
}

impl Command {
    /// Whether this command can be sent to a channel of `kind`.
    pub fn fits(&self, kind: ChannelKind) -> bool {
        matches!(
            (self, kind),
            (Self::Refresh, _)
                | (Self::Switch(_), ChannelKind::Switch)
                | (Self::Number(_), ChannelKind::Number)
                | (Self::Text(_), ChannelKind::Text)
        )
    }

    /// Value as sent in a vendor control request.
    pub fn payload(&self) -> String {
        match self {
            Self::Refresh => String::new(),
            Self::Switch(on) => if *on { "1" } else { "0" }.to_owned(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}
