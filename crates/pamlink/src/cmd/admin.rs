use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use pamlink_relay::{AdminEvent, AdminServer, ControlCommand, ControlEvent};
use pamlink_signal::{classify_chunk, WireMode};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, AdminArgs, Toggle};
use crate::exit::{relay_error, CliResult, SUCCESS};
use crate::output::{now_unix_seconds, print_record, ChunkText, OutputFormat, Record};

#[derive(Debug, Serialize)]
struct AdminRecord {
    timestamp: String,
    relay: SocketAddr,
    event: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ChunkText>,
}

impl Record for AdminRecord {
    fn columns(&self) -> Vec<(&'static str, String)> {
        let content = self
            .content
            .as_ref()
            .map(ChunkText::summary)
            .unwrap_or_default();
        vec![
            ("timestamp", self.timestamp.clone()),
            ("relay", self.relay.to_string()),
            ("event", self.event.to_string()),
            ("detail", self.detail.clone()),
            ("content", content),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        format!("{} {} {}\n", self.relay, self.event, self.detail).into_bytes()
    }
}

impl AdminRecord {
    fn from_event(event: AdminEvent, wire_mode: WireMode) -> Self {
        let (relay, event, detail, content) = match event {
            AdminEvent::Connected(relay) => (relay, "connected", String::new(), None),
            AdminEvent::Disconnected(relay) => (relay, "disconnected", String::new(), None),
            AdminEvent::Line { relay, event } => {
                let content = event
                    .payload()
                    .map(|wire| ChunkText::from(classify_chunk(&wire_mode.from_wire(&wire))));
                let (kind, detail) = match event {
                    ControlEvent::Announce { key, value } => ("info", format!("{key}={value}")),
                    ControlEvent::Original(encoded) => ("original", encoded),
                    ControlEvent::Modulated(encoded) => ("modulated", encoded),
                    ControlEvent::Forwarded { target } => ("forwarded", target),
                    ControlEvent::ForwardFailed { target, error } => {
                        ("forward_failed", format!("{target}: {error}"))
                    }
                    ControlEvent::Other(line) => ("other", line),
                };
                (relay, kind, detail, content)
            }
        };
        Self {
            timestamp: now_unix_seconds(),
            relay,
            event,
            detail,
            content,
        }
    }
}

pub fn run(args: AdminArgs, format: OutputFormat) -> CliResult<i32> {
    let server = AdminServer::bind(args.listen).map_err(|err| relay_error("bind failed", err))?;
    info!(listen = %server.local_addr(), "control server listening");

    let running = install_ctrlc_handler()?;
    let command = args.set.map(|toggle| ControlCommand::error_mode(toggle == Toggle::On));
    let stop = Arc::clone(&running);
    let mut printed = 0usize;

    server
        .serve(&running, |handle, event| {
            if let (AdminEvent::Connected(relay), Some(command)) = (&event, &command) {
                match handle.send(command) {
                    Ok(_) => info!(%relay, ?command, "command sent"),
                    Err(err) => warn!(%relay, error = %err, "command failed"),
                }
            }

            print_record(&AdminRecord::from_event(event, args.wire_mode), format);
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                stop.store(false, Ordering::SeqCst);
            }
        })
        .map_err(|err| relay_error("control server failed", err))?;

    Ok(SUCCESS)
}
