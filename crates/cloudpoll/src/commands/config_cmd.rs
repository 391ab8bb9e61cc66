//! `config`: where the configuration lives and what it resolves to.

use std::collections::BTreeMap;

use cloudpoll_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::{config_path, load_config};

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config_path(global).display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Show => {
            let config = load_config(global)?;
            let shown = Config {
                default_thing: config.default_thing.clone(),
                defaults: config.defaults,
                things: config
                    .things
                    .iter()
                    .map(|(name, thing)| (name.clone(), thing.redacted()))
                    .collect::<BTreeMap<_, _>>(),
            };
            let out = match output::structured(&global.output, &shown) {
                Some(json) => json,
                None => toml::to_string_pretty(&shown)?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
