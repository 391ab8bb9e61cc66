use chrono::{DateTime, Utc};
use serde::Serialize;

use super::value::{ChannelKind, TypedValue};

/// One channel state change produced by the mapper. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelUpdate {
    pub channel_id: String,
    pub value: TypedValue,
    pub timestamp: DateTime<Utc>,
    /// Human-readable label from the payload (section name), used when the
    /// channel has to be created on the fly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ChannelUpdate {
    pub fn new(channel_id: impl Into<String>, value: TypedValue, timestamp: DateTime<Utc>) -> Self {
        Self {
            channel_id: channel_id.into(),
            value,
            timestamp,
            label: None,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn spec(&self) -> ChannelSpec {
        ChannelSpec {
            id: self.channel_id.clone(),
            kind: self.value.kind(),
            label: self.label.clone().unwrap_or_else(|| self.channel_id.clone()),
        }
    }
}

/// A channel the host should create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSpec {
    pub id: String,
    pub kind: ChannelKind,
    pub label: String,
}
