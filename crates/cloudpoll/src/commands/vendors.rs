//! `vendors`: the built-in vendor profiles.

use cloudpoll_api::auth::LoginFlow;
use cloudpoll_core::{BindingProfile, profiles};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct VendorInfo {
    vendor: &'static str,
    description: &'static str,
    auth: &'static str,
    discovery: bool,
    commands: bool,
    default_refresh_secs: u64,
}

impl From<&BindingProfile> for VendorInfo {
    fn from(p: &BindingProfile) -> Self {
        Self {
            vendor: p.vendor,
            description: p.description,
            auth: match p.auth.login {
                LoginFlow::StaticToken => "token",
                LoginFlow::Request(_) => "login",
            },
            discovery: p.discovery.is_some(),
            commands: !p.commands.is_empty(),
            default_refresh_secs: p.default_refresh.as_secs(),
        }
    }
}

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct VendorRow {
    #[tabled(rename = "Vendor")]
    vendor: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Auth")]
    auth: String,
    #[tabled(rename = "Discovery")]
    discovery: String,
    #[tabled(rename = "Commands")]
    commands: String,
    #[tabled(rename = "Refresh")]
    refresh: String,
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "-" }.to_owned()
}

impl From<&VendorInfo> for VendorRow {
    fn from(v: &VendorInfo) -> Self {
        Self {
            vendor: v.vendor.to_owned(),
            description: v.description.to_owned(),
            auth: v.auth.to_owned(),
            discovery: yes_no(v.discovery),
            commands: yes_no(v.commands),
            refresh: humantime::format_duration(std::time::Duration::from_secs(
                v.default_refresh_secs,
            ))
            .to_string(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::unnecessary_wraps)]
pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let all: Vec<VendorInfo> = profiles().into_iter().map(VendorInfo::from).collect();
    let out = output::render_list(&global.output, &all, |v| VendorRow::from(v), |v| {
        v.vendor.to_owned()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
