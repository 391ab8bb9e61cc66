//! `things`: the things named in the configuration file.

use serde::Serialize;
use tabled::Tabled;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::load_config;

#[derive(Serialize)]
struct ThingInfo {
    name: String,
    vendor: String,
    device_id: Option<String>,
    refresh_interval: Option<String>,
    discovery: bool,
    default: bool,
}

#[derive(Tabled)]
struct ThingRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Vendor")]
    vendor: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Refresh")]
    refresh: String,
    #[tabled(rename = "Discovery")]
    discovery: &'static str,
}

impl From<&ThingInfo> for ThingRow {
    fn from(t: &ThingInfo) -> Self {
        Self {
            marker: if t.default { "*" } else { "" },
            name: t.name.clone(),
            vendor: t.vendor.clone(),
            device: t.device_id.clone().unwrap_or_default(),
            refresh: t.refresh_interval.clone().unwrap_or_else(|| "vendor default".into()),
            discovery: if t.discovery { "on" } else { "-" },
        }
    }
}

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let config = load_config(global)?;
    let default = config.default_thing_name().map(str::to_owned);
    let all: Vec<ThingInfo> = config
        .things
        .iter()
        .map(|(name, t)| ThingInfo {
            name: name.clone(),
            vendor: t.vendor.clone(),
            device_id: t.device_id.clone(),
            refresh_interval: t
                .refresh_interval
                .clone()
                .or_else(|| config.defaults.refresh_interval.clone()),
            discovery: t.discovery,
            default: default.as_deref() == Some(name.as_str()),
        })
        .collect();

    let out = output::render_list(
        &global.output,
        &all,
        |t| ThingRow::from(t),
        |t| t.name.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
