//! `check`: log in once and report the thing status.

use serde::Serialize;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::{build_handler, thing_config};

#[derive(Serialize)]
struct CheckResult {
    thing: String,
    vendor: String,
    status: cloudpoll_core::ThingStatus,
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let config = thing_config(global)?;
    let vendor = config.vendor.clone();
    let (handler, _sink) = build_handler(config)?;

    let result = super::login(&handler).await;
    let report = CheckResult {
        thing: handler.thing_id().to_owned(),
        vendor,
        status: handler.current_status(),
    };
    handler.dispose().await;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| {
            format!(
                "{} {} ({})",
                output::paint_key(&r.thing, color),
                output::paint_status(&r.status, color),
                r.vendor
            )
        },
        |r| r.status.to_string(),
    );
    output::print_output(&out, global.quiet);
    result
}
