//! Rendering for `--output`.
//!
//! JSON variants go through serde; `table` uses `tabled` for lists and a
//! command-supplied detail line for single items; `plain` prints one id
//! per line for scripts.

use std::io::{self, IsTerminal, Write};

use cloudpoll_core::ThingStatus;
use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};

// ── Color ────────────────────────────────────────────────────────────

pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

/// Green online, red offline, yellow misconfigured, dimmed otherwise.
pub fn paint_status(status: &ThingStatus, color: bool) -> String {
    let text = status.to_string();
    if !color {
        return text;
    }
    match status {
        ThingStatus::Online => text.green().to_string(),
        ThingStatus::Offline(_) => text.red().to_string(),
        ThingStatus::ConfigurationError(_) => text.yellow().to_string(),
        ThingStatus::Uninitialized | ThingStatus::Disposed => text.dimmed().to_string(),
    }
}

pub fn paint_key(text: &str, color: bool) -> String {
    if color {
        text.cyan().to_string()
    } else {
        text.to_owned()
    }
}

// ── Rendering ────────────────────────────────────────────────────────

/// JSON rendering for the structured formats, `None` for `table`/`plain`.
pub fn structured<T: serde::Serialize + ?Sized>(format: &OutputFormat, data: &T) -> Option<String> {
    match format {
        OutputFormat::Json => Some(render_json(data, false)),
        OutputFormat::JsonCompact => Some(render_json(data, true)),
        OutputFormat::Table | OutputFormat::Plain => None,
    }
}

/// A list: rows for `table`, ids for `plain`.
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
    R: Tabled,
{
    if let Some(json) = structured(format, data) {
        return json;
    }
    if matches!(format, OutputFormat::Plain) {
        return data.iter().map(id_fn).collect::<Vec<_>>().join("\n");
    }
    let rows: Vec<R> = data.iter().map(to_row).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// One item: a detail line for `table`, its id for `plain`.
pub fn render_single<T: serde::Serialize>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> String {
    structured(format, data).unwrap_or_else(|| match format {
        OutputFormat::Plain => id_fn(data),
        _ => detail_fn(data),
    })
}

pub fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_else(|e| format!("{{\"error\":\"serialization failed: {e}\"}}"))
}

/// Print to stdout unless `--quiet`. Empty output prints nothing.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let _ = writeln!(io::stdout().lock(), "{output}");
}
