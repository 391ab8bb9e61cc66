//! Command handlers and the plumbing they share.

pub mod check;
pub mod config_cmd;
pub mod discover;
pub mod poll;
pub mod send;
pub mod things;
pub mod vendors;

use std::path::PathBuf;
use std::sync::Arc;

use cloudpoll_config::Config;
use cloudpoll_core::{BroadcastSink, HttpBinding, ThingConfig, ThingHandler};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file location: `--config`, else the platform path.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(cloudpoll_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(cloudpoll_config::load_config_from(&config_path(global))?)
}

/// Resolve the thing selected by `--thing` or the config default.
pub fn thing_config(global: &GlobalOpts) -> Result<ThingConfig, CliError> {
    let config = load_config(global)?;
    let available = || {
        if config.things.is_empty() {
            "(none)".to_owned()
        } else {
            config.things.keys().cloned().collect::<Vec<_>>().join(", ")
        }
    };

    let name = match global.thing.as_deref().or_else(|| config.default_thing_name()) {
        Some(name) => name.to_owned(),
        None => {
            return Err(CliError::NoThing {
                path: config_path(global).display().to_string(),
                available: available(),
            });
        }
    };
    if !config.things.contains_key(&name) {
        return Err(CliError::ThingNotFound {
            available: available(),
            name,
        });
    }
    Ok(cloudpoll_config::resolve_thing_config(&config, &name)?)
}

/// Handler for `config`, reporting to a fresh broadcast sink.
pub fn build_handler(config: ThingConfig) -> Result<(ThingHandler<HttpBinding>, BroadcastSink), CliError> {
    let binding = HttpBinding::new(&config)?;
    let sink = BroadcastSink::new();
    tracing::debug!(thing = %config.thing_id, vendor = %config.vendor, "handler built");
    let handler = ThingHandler::new(config, binding, Arc::new(sink.clone()));
    Ok((handler, sink))
}

/// First login for one-shot commands; anything but `Online` is an error.
pub async fn login(handler: &ThingHandler<HttpBinding>) -> Result<(), CliError> {
    match handler.login().await? {
        cloudpoll_core::ThingStatus::Online => Ok(()),
        cloudpoll_core::ThingStatus::ConfigurationError(reason) => {
            Err(CliError::AuthFailed { reason })
        }
        cloudpoll_core::ThingStatus::Offline(reason) if reason == "Timeout" => {
            Err(CliError::Timeout)
        }
        other => Err(CliError::NotOnline {
            status: other.to_string(),
        }),
    }
}
