//! `poll`: run poll cycles and print what the handler reports.

use std::sync::Arc;
use std::time::Duration;

use cloudpoll_core::{HttpBinding, SinkEvent, ThingHandler};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::cli::{GlobalOpts, OutputFormat, PollArgs};
use crate::error::CliError;
use crate::output;

use super::{build_handler, thing_config};

pub async fn handle(args: PollArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut config = thing_config(global)?;
    if let Some(interval) = args.interval {
        config.refresh_interval = interval;
    }
    config.initial_delay = Duration::ZERO;
    let interval = config.refresh_interval;

    let (handler, sink) = build_handler(config)?;
    let mut rx = sink.subscribe();
    let printer = Printer::new(global);

    let result = if args.count == 0 {
        follow(&handler, &mut rx, &printer).await
    } else {
        cycles(&handler, &mut rx, &printer, args.count, interval).await
    };
    handler.dispose().await;
    drain(&mut rx, &printer);
    result
}

/// Scheduled polling until Ctrl-C.
async fn follow(
    handler: &ThingHandler<HttpBinding>,
    rx: &mut broadcast::Receiver<Arc<SinkEvent>>,
    printer: &Printer,
) -> Result<(), CliError> {
    handler.initialize().await?;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            biased;
            _ = &mut interrupted => {
                tracing::info!("interrupted, shutting down");
                return Ok(());
            }
            event = rx.recv() => match event {
                Ok(event) => printer.print(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output fell behind, events dropped");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// A fixed number of cycles, `interval` apart.
async fn cycles(
    handler: &ThingHandler<HttpBinding>,
    rx: &mut broadcast::Receiver<Arc<SinkEvent>>,
    printer: &Printer,
    count: u32,
    interval: Duration,
) -> Result<(), CliError> {
    super::login(handler).await?;
    drain(rx, printer);
    for cycle in 0..count {
        if cycle > 0 {
            tokio::time::sleep(interval).await;
        }
        handler.refresh().await?;
        drain(rx, printer);
    }

    match handler.current_status() {
        cloudpoll_core::ThingStatus::Online => Ok(()),
        cloudpoll_core::ThingStatus::Offline(reason) if reason == "Timeout" => {
            Err(CliError::Timeout)
        }
        other => Err(CliError::NotOnline {
            status: other.to_string(),
        }),
    }
}

/// Print whatever is buffered. Returns how many events were lost to lag.
fn drain(rx: &mut broadcast::Receiver<Arc<SinkEvent>>, printer: &Printer) -> u64 {
    let mut lost = 0;
    loop {
        match rx.try_recv() {
            Ok(event) => printer.print(&event),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "output fell behind, events dropped");
                lost += skipped;
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return lost,
        }
    }
}

// ── Event printing ──────────────────────────────────────────────────

struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
}

impl Printer {
    fn new(global: &GlobalOpts) -> Self {
        Self {
            format: global.output.clone(),
            color: output::should_color(&global.color),
            quiet: global.quiet,
        }
    }

    fn print(&self, event: &SinkEvent) {
        let line = match self.format {
            // One event per line, even for `--output json`.
            OutputFormat::Json | OutputFormat::JsonCompact => {
                Some(output::render_json(event, true))
            }
            OutputFormat::Plain => match event {
                SinkEvent::State { update, .. } => {
                    Some(format!("{}={}", update.channel_id, update.value))
                }
                _ => None,
            },
            OutputFormat::Table => self.human(event),
        };
        if let Some(line) = line {
            output::print_output(&line, self.quiet);
        }
    }

    fn human(&self, event: &SinkEvent) -> Option<String> {
        match event {
            SinkEvent::State { update, .. } => Some(format!(
                "{}  {} = {}",
                update.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
                output::paint_key(&update.channel_id, self.color),
                update.value
            )),
            SinkEvent::Status { thing, status } => Some(format!(
                "{thing} is {}",
                output::paint_status(status, self.color)
            )),
            SinkEvent::Discovered { device, .. } => Some(format!(
                "discovered {} ({}, {})",
                device.display_name, device.external_id, device.device_type
            )),
            SinkEvent::ChannelCreated { .. } => None,
        }
    }
}
