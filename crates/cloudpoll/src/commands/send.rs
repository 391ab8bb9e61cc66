//! `send`: dispatch one command to a channel.

use cloudpoll_core::{Binding, ChannelKind, Command};

use crate::cli::{GlobalOpts, SendArgs};
use crate::error::CliError;

use super::{build_handler, thing_config};

/// Interpret `raw` for a channel of `kind`.
pub fn parse_command(kind: ChannelKind, raw: &str) -> Result<Command, String> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("refresh") {
        return Ok(Command::Refresh);
    }
    match kind {
        ChannelKind::Switch => match raw.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(Command::Switch(true)),
            "off" | "false" | "0" => Ok(Command::Switch(false)),
            _ => Err(format!("'{raw}' is not on/off")),
        },
        ChannelKind::Number => raw
            .parse::<f64>()
            .map(Command::Number)
            .map_err(|_| format!("'{raw}' is not a number")),
        ChannelKind::Text => Ok(Command::Text(raw.to_owned())),
        ChannelKind::Timestamp => Err("timestamp channels take no commands".into()),
    }
}

pub async fn handle(args: SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = thing_config(global)?;
    let (handler, _sink) = build_handler(config)?;

    let command = if args.value.trim().eq_ignore_ascii_case("refresh") {
        Command::Refresh
    } else {
        let kind = handler
            .binding()
            .command_kind(&args.channel)
            .ok_or_else(|| CliError::UnknownChannel {
                channel: args.channel.clone(),
            })?;
        parse_command(kind, &args.value).map_err(|reason| CliError::Validation {
            field: args.channel.clone(),
            reason,
        })?
    };

    let result = match super::login(&handler).await {
        Ok(()) => handler
            .handle_command(&args.channel, command)
            .await
            .map_err(CliError::from),
        Err(e) => Err(e),
    };
    handler.dispose().await;
    result?;

    if !global.quiet {
        eprintln!("Command sent to {}", args.channel);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn switch_values_accept_common_spellings() {
        assert_eq!(parse_command(ChannelKind::Switch, "ON"), Ok(Command::Switch(true)));
        assert_eq!(parse_command(ChannelKind::Switch, "0"), Ok(Command::Switch(false)));
        assert!(parse_command(ChannelKind::Switch, "maybe").is_err());
    }

    #[test]
    fn refresh_fits_any_channel() {
        assert_eq!(parse_command(ChannelKind::Number, "refresh"), Ok(Command::Refresh));
    }

    #[test]
    fn numbers_and_text_parse_by_kind() {
        assert_eq!(parse_command(ChannelKind::Number, " 2 "), Ok(Command::Number(2.0)));
        assert_eq!(
            parse_command(ChannelKind::Text, "ARMED"),
            Ok(Command::Text("ARMED".into()))
        );
        assert!(parse_command(ChannelKind::Timestamp, "x").is_err());
    }
}
