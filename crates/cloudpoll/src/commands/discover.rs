//! `discover`: list the devices behind a bridge account.

use cloudpoll_core::{Binding, DiscoveredDevice, DiscoveryError};
use tabled::Tabled;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::{build_handler, thing_config};

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    device_type: String,
    #[tabled(rename = "Properties")]
    properties: String,
}

impl From<&DiscoveredDevice> for DeviceRow {
    fn from(d: &DiscoveredDevice) -> Self {
        Self {
            id: d.external_id.clone(),
            name: d.display_name.clone(),
            device_type: d.device_type.clone(),
            properties: d
                .properties
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let mut config = thing_config(global)?;
    config.discovery = false;
    let (handler, _sink) = build_handler(config)?;

    if !handler.binding().supports_discovery() {
        return Err(CliError::Unsupported {
            message: format!(
                "vendor '{}' has no device discovery",
                handler.binding().vendor()
            ),
        });
    }

    let result = match super::login(&handler).await {
        Ok(()) => handler.discover().await.map_err(|e| match e {
            DiscoveryError::BridgeOffline => CliError::NotOnline {
                status: handler.current_status().to_string(),
            },
            DiscoveryError::CommunicationError(reason) => CliError::Vendor { reason },
        }),
        Err(e) => Err(e),
    };
    handler.dispose().await;
    let devices = result?;

    let out = output::render_list(&global.output, &devices, |d| DeviceRow::from(d), |d| {
        d.external_id.clone()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
