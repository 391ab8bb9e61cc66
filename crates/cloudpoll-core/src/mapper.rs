// ── Response mapping ──
//
// Turns a decoded vendor payload into channel updates using a fixed
// field→channel table. Mapping never fails as a whole: absent fields are
// skipped silently, malformed ones are logged and skipped.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use cloudpoll_api::envelope::FieldMatch;
use cloudpoll_api::ExtractionRule;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::MapError;
use crate::model::{ChannelKind, ChannelUpdate, TypedValue};

// ── Mapping tables ──────────────────────────────────────────────────

/// Post-processing applied to a raw value before it becomes a channel state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    None,
    /// Multiply a number (ratios reported as fractions, shown as percent).
    Scale(f64),
    /// The value is an age in seconds; the state is "now minus age".
    AgeSeconds,
}

/// A single top-level field mapped to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    /// Dotted path; `*` selects the first entry of an object or array.
    pub path: &'static str,
    pub channel: &'static str,
    pub kind: ChannelKind,
    pub transform: Transform,
}

impl FieldRule {
    pub const fn new(path: &'static str, channel: &'static str, kind: ChannelKind) -> Self {
        Self {
            path,
            channel,
            kind,
            transform: Transform::None,
        }
    }

    pub const fn scaled(mut self, factor: f64) -> Self {
        self.transform = Transform::Scale(factor);
        self
    }
}

/// How a section's identifier is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionId {
    /// A field inside the section object.
    Field(&'static str),
    /// The map key (map-shaped payloads) or array index (list-shaped).
    Key,
}

/// A list-or-map of sub-devices, each producing one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionRule {
    /// Where the sections live; empty for a top-level array.
    pub path: &'static str,
    pub id: SectionId,
    /// Channel id template; `{id}` is replaced with the section id.
    pub channel: &'static str,
    /// Field holding a human-readable label.
    pub label: Option<&'static str>,
    /// Value path inside the section; `*` selects the first entry.
    pub value: &'static str,
    pub kind: ChannelKind,
    pub transform: Transform,
    /// Only sections matching this are mapped.
    pub filter: Option<FieldMatch>,
}

/// A value scraped from an HTML page.
#[derive(Debug, Clone, PartialEq)]
pub struct HtmlRule {
    /// Search starts after the first occurrence of this anchor.
    pub after: Option<&'static str>,
    pub rule: ExtractionRule,
    pub channel: &'static str,
    pub kind: ChannelKind,
}

/// Delimits one account or currency block on an HTML page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBounds {
    /// `{id}` is replaced with the segment id.
    pub start: &'static str,
    pub end: &'static str,
}

/// Complete field→channel table for one vendor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTable {
    pub fields: Vec<FieldRule>,
    pub sections: Vec<SectionRule>,
    pub html: Vec<HtmlRule>,
    pub segment: Option<SegmentBounds>,
    /// Timestamp channel set to the mapping time on every pass.
    pub check_time_channel: Option<&'static str>,
}

// ── Time zones ──────────────────────────────────────────────────────

/// Zone vendor timestamps are normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl Default for VendorZone {
    fn default() -> Self {
        Self::Named(Tz::UTC)
    }
}

impl VendorZone {
    /// Parse an IANA zone name (`Europe/Prague`).
    pub fn named(name: &str) -> Option<Self> {
        name.parse::<Tz>().ok().map(Self::Named)
    }

    pub fn convert(self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Self::Named(tz) => instant.with_timezone(&tz).fixed_offset(),
            Self::Fixed(offset) => instant.with_timezone(&offset),
        }
    }

    /// Interpret a wall-clock time in this zone. Ambiguous times take the
    /// earlier instant; times skipped by a DST change are rejected.
    fn localize(self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::Named(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.fixed_offset()),
            Self::Fixed(offset) => offset.from_local_datetime(&naive).earliest(),
        }
    }
}

// ── Mapper ──────────────────────────────────────────────────────────

/// Stateless mapper for one vendor schema.
#[derive(Debug, Clone)]
pub struct ResponseMapper {
    table: MappingTable,
    zone: VendorZone,
}

impl ResponseMapper {
    pub fn new(table: MappingTable, zone: VendorZone) -> Self {
        Self { table, zone }
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    pub fn zone(&self) -> VendorZone {
        self.zone
    }

    /// Map a whole payload.
    pub fn map(&self, payload: &Value) -> Vec<ChannelUpdate> {
        self.map_at(payload, Utc::now())
    }

    /// Map a whole payload, with `now` as the update timestamp.
    pub fn map_at(&self, payload: &Value, now: DateTime<Utc>) -> Vec<ChannelUpdate> {
        let mut updates = Vec::new();
        match payload {
            Value::String(page) => self.map_html(page, now, &mut updates),
            _ => {
                self.map_fields(payload, now, &mut updates);
                self.map_sections(payload, None, now, &mut updates);
            }
        }
        self.push_check_time(now, &mut updates);
        updates
    }

    /// Map only the part of a payload belonging to one segment: the
    /// section with that id, or the page block delimited by the table's
    /// segment bounds.
    pub fn map_segment(&self, payload: &Value, segment: &str) -> Vec<ChannelUpdate> {
        let now = Utc::now();
        let mut updates = Vec::new();
        match payload {
            Value::String(page) => {
                let Some(block) = self.segment_block(page, segment) else {
                    warn!(segment, "segment not found in page");
                    return updates;
                };
                self.map_html(block, now, &mut updates);
            }
            _ => self.map_sections(payload, Some(segment), now, &mut updates),
        }
        if !updates.is_empty() {
            self.push_check_time(now, &mut updates);
        }
        updates
    }

    fn segment_block<'a>(&self, page: &'a str, segment: &str) -> Option<&'a str> {
        let Some(bounds) = self.table.segment else {
            return Some(page);
        };
        let start = bounds.start.replace("{id}", segment);
        let from = page.find(&start)?;
        let block = &page[from..];
        Some(block.find(bounds.end).map_or(block, |end| &block[..end]))
    }

    fn map_fields(&self, payload: &Value, now: DateTime<Utc>, out: &mut Vec<ChannelUpdate>) {
        for rule in &self.table.fields {
            let Some(raw) = resolve(payload, rule.path) else {
                continue;
            };
            self.push(rule.channel, rule.kind, rule.transform, raw, None, now, out);
        }
    }

    fn map_sections(
        &self,
        payload: &Value,
        only: Option<&str>,
        now: DateTime<Utc>,
        out: &mut Vec<ChannelUpdate>,
    ) {
        for rule in &self.table.sections {
            let Some(container) = resolve(payload, rule.path) else {
                continue;
            };
            for (key, section) in normalize_sections(container) {
                if rule.filter.as_ref().is_some_and(|f| !f.matches(section)) {
                    continue;
                }
                let id = match rule.id {
                    SectionId::Key => key,
                    SectionId::Field(field) => match resolve(section, field).map(scalar_text) {
                        Some(id) if !id.is_empty() => id,
                        _ => {
                            debug!(path = rule.path, "section without id skipped");
                            continue;
                        }
                    },
                };
                if only.is_some_and(|wanted| wanted != id) {
                    continue;
                }
                let Some(raw) = resolve(section, rule.value) else {
                    continue;
                };
                let label = rule
                    .label
                    .and_then(|l| resolve(section, l))
                    .map(scalar_text)
                    .filter(|l| !l.is_empty());
                let channel = rule.channel.replace("{id}", &id);
                self.push(&channel, rule.kind, rule.transform, raw, label, now, out);
            }
        }
    }

    fn map_html(&self, page: &str, now: DateTime<Utc>, out: &mut Vec<ChannelUpdate>) {
        for html in &self.table.html {
            let scope = match html.after {
                Some(anchor) => match page.find(anchor) {
                    Some(pos) => &page[pos + anchor.len()..],
                    None => {
                        warn!(channel = html.channel, anchor, "label not found on page");
                        continue;
                    }
                },
                None => page,
            };
            let raw = match html.rule.apply(scope) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(channel = html.channel, error = %e, "extraction failed, skipping");
                    continue;
                }
            };
            let value = match html.kind {
                ChannelKind::Number => Value::String(numeric_text(raw)),
                _ => Value::String(raw.trim().to_owned()),
            };
            self.push(html.channel, html.kind, Transform::None, &value, None, now, out);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &self,
        channel: &str,
        kind: ChannelKind,
        transform: Transform,
        raw: &Value,
        label: Option<String>,
        now: DateTime<Utc>,
        out: &mut Vec<ChannelUpdate>,
    ) {
        if raw.is_null() {
            return;
        }
        match self.convert(channel, kind, transform, raw, now) {
            Ok(value) => out.push(ChannelUpdate::new(channel, value, now).with_label(label)),
            Err(e) => warn!(error = %e, "skipping channel"),
        }
    }

    fn convert(
        &self,
        channel: &str,
        kind: ChannelKind,
        transform: Transform,
        raw: &Value,
        now: DateTime<Utc>,
    ) -> Result<TypedValue, MapError> {
        let fail = || MapError::FieldParseFailure {
            field: channel.to_owned(),
            expected: kind,
            found: raw.to_string(),
        };

        if transform == Transform::AgeSeconds {
            let instant = as_number(raw)
                .and_then(age_delta)
                .and_then(|age| now.checked_sub_signed(age))
                .ok_or_else(fail)?;
            return match kind {
                ChannelKind::Timestamp => Ok(TypedValue::Timestamp(self.zone.convert(instant))),
                _ => Err(fail()),
            };
        }

        match kind {
            ChannelKind::Number => {
                let n = as_number(raw).ok_or_else(fail)?;
                let n = match transform {
                    Transform::Scale(factor) => n * factor,
                    _ => n,
                };
                if !n.is_finite() {
                    return Err(fail());
                }
                Ok(TypedValue::Number(n))
            }
            ChannelKind::Switch => as_switch(raw).map(TypedValue::Switch).ok_or_else(fail),
            ChannelKind::Text => match raw {
                Value::Object(_) | Value::Array(_) => Err(fail()),
                other => Ok(TypedValue::Text(scalar_text(other))),
            },
            ChannelKind::Timestamp => self
                .as_timestamp(raw)
                .map(TypedValue::Timestamp)
                .ok_or_else(fail),
        }
    }

    fn as_timestamp(&self, raw: &Value) -> Option<DateTime<FixedOffset>> {
        if let Some(epoch) = as_number(raw) {
            if epoch.abs() >= I64_BOUND {
                return None;
            }
            #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
            let instant = if epoch.abs() > 1e12 {
                DateTime::from_timestamp_millis(epoch as i64)
            } else {
                DateTime::from_timestamp(epoch as i64, 0)
            };
            return instant.map(|i| self.zone.convert(i));
        }
        let text = raw.as_str()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(self.zone.convert(dt.with_timezone(&Utc)));
        }
        ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .and_then(|naive| self.zone.localize(naive))
    }

    fn push_check_time(&self, now: DateTime<Utc>, out: &mut Vec<ChannelUpdate>) {
        if let Some(channel) = self.table.check_time_channel {
            out.push(ChannelUpdate::new(
                channel,
                TypedValue::Timestamp(self.zone.convert(now)),
                now,
            ));
        }
    }
}

// ── Payload helpers ─────────────────────────────────────────────────

/// Resolve a dotted path. Numeric segments index arrays; `*` picks the
/// first entry of an object or array.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match (current, segment) {
        (Value::Object(map), "*") => map.values().next(),
        (Value::Array(items), "*") => items.first(),
        (Value::Object(map), key) => map.get(key),
        (Value::Array(items), index) => index.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Normalize a list-or-map of sections into one ordered list of
/// `(key, section)`. Lists keep array order with the index as key; maps
/// keep the response's key order.
pub fn normalize_sections(value: &Value) -> Vec<(String, &Value)> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (i.to_string(), item))
            .collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        _ => Vec::new(),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Finite numbers only; `"NaN"` and `"inf"` are not readings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Magnitudes at or above 2^63 do not fit an `i64`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Age in seconds as a delta, if it is one chrono can represent.
fn age_delta(age: f64) -> Option<TimeDelta> {
    let millis = age * 1000.0;
    if millis.abs() >= I64_BOUND {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    TimeDelta::try_milliseconds(millis as i64)
}

fn as_switch(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Some(true),
            "off" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Keep only the numeric part of a formatted amount (`€ 1,234.56`, `12.3 %`).
fn numeric_text(raw: &str) -> String {
    let mut out = String::new();
    for c in raw.chars() {
        if c.is_ascii_digit() || c == '.' || (c == '-' && out.is_empty()) {
            out.push(c);
        }
    }
    out
}
