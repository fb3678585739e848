use std::fs;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use pamlink_frame::{Frame, FrameConfig, FrameError, FRAME_MARKER};
use pamlink_signal::{encode, SymbolWidth, WireMode};
use pamlink_transport::{ForwarderConfig, PersistentForwarder, TransportError};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, SendArgs};
use crate::exit::{
    frame_error, io_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR, USAGE,
};
use crate::output::{print_record, OutputFormat, Record};

#[derive(Debug, Serialize)]
struct SendSummary {
    targets: Vec<String>,
    symbols: usize,
    wire_bytes: usize,
    writes: u64,
    failures: u64,
    interrupted: bool,
}

impl Record for SendSummary {
    fn columns(&self) -> Vec<(&'static str, String)> {
        vec![
            ("targets", self.targets.join(",")),
            ("symbols", self.symbols.to_string()),
            ("wire_bytes", self.wire_bytes.to_string()),
            ("writes", self.writes.to_string()),
            ("failures", self.failures.to_string()),
            ("interrupted", self.interrupted.to_string()),
        ]
    }
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let retry_delay = parse_duration(&args.retry_delay)?;
    if args.wire_mode == WireMode::Packed && args.width != SymbolWidth::Pam4 {
        return Err(CliError::new(
            USAGE,
            "packed wire mode carries 2-bit symbols only",
        ));
    }

    let symbols = resolve_symbols(&args)?;
    let wire = args.wire_mode.to_wire(&symbols);
    let writes = if args.frames {
        let config = FrameConfig::new(args.frame_len, args.header_len);
        frame_payload(&wire, &config)
            .map_err(|err| frame_error("invalid frame geometry", err))?
            .into_iter()
            .map(|frame| frame.as_bytes().to_vec())
            .collect()
    } else {
        vec![wire.clone()]
    };

    let running = install_ctrlc_handler()?;
    let config = ForwarderConfig {
        retry_delay,
        ..ForwarderConfig::default()
    };
    let forwarders: Vec<PersistentForwarder> = args
        .targets
        .iter()
        .map(|target| {
            PersistentForwarder::new(target.clone(), &config).with_running_flag(running.clone())
        })
        .collect();

    let mut summary = SendSummary {
        targets: args.targets.iter().map(ToString::to_string).collect(),
        symbols: symbols.len(),
        wire_bytes: wire.len(),
        writes: 0,
        failures: 0,
        interrupted: false,
    };

    'repeat: for round in 0..args.repeat {
        if round > 0 {
            thread::sleep(interval);
        }
        for bytes in &writes {
            for forwarder in &forwarders {
                if !running.load(Ordering::SeqCst) {
                    summary.interrupted = true;
                    break 'repeat;
                }
                match forwarder.send(bytes) {
                    Ok(()) => summary.writes += 1,
                    Err(TransportError::Shutdown) => {
                        summary.interrupted = true;
                        break 'repeat;
                    }
                    Err(err) => {
                        summary.failures += 1;
                        warn!(dest = %forwarder.target(), error = %err, "send failed");
                    }
                }
            }
        }
        info!(round = round + 1, len = wire.len(), "payload sent");
    }

    print_record(&summary, format);
    if summary.failures > 0 {
        return Err(CliError::new(
            TRANSPORT_ERROR,
            format!("{} write(s) failed", summary.failures),
        ));
    }
    Ok(SUCCESS)
}

fn resolve_symbols(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(symbols) = &args.symbols {
        return Ok(symbols.iter().map(|&s| args.width.reduce(s)).collect());
    }
    if let Some(text) = &args.text {
        return Ok(encode(text.as_bytes(), args.width));
    }
    if let Some(path) = &args.file {
        let bytes = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return Ok(encode(&bytes, args.width));
    }
    Err(CliError::new(
        USAGE,
        "one of --text, --file or --symbols is required",
    ))
}

/// Split wire bytes into marker-headed frames, zero-padding the last payload.
fn frame_payload(wire: &[u8], config: &FrameConfig) -> pamlink_frame::Result<Vec<Frame>> {
    config.validate()?;
    let header: Vec<u8> = FRAME_MARKER
        .iter()
        .copied()
        .chain(std::iter::repeat(0))
        .take(config.header_len)
        .collect();
    let payload_len = config.payload_len();
    if payload_len == 0 {
        return Err(FrameError::InvalidConfig {
            frame_len: config.frame_len,
            header_len: config.header_len,
        });
    }

    let frames = wire
        .chunks(payload_len)
        .map(|chunk| {
            let mut payload = chunk.to_vec();
            payload.resize(payload_len, 0);
            Frame::from_parts(&header, &payload)
        })
        .collect();
    Ok(frames)
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use pamlink_frame::{FrameAssembler, DEFAULT_FRAME_LEN, DEFAULT_HEADER_LEN};

    use super::*;

    #[test]
    fn frames_carry_marker_and_padding() {
        let config = FrameConfig::new(DEFAULT_FRAME_LEN, DEFAULT_HEADER_LEN);
        let wire: Vec<u8> = (0..100).collect();
        let frames = frame_payload(&wire, &config).unwrap();

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 68 && f.header() == b"hola"));
        assert_eq!(frames[0].payload(), &wire[..64]);
        assert_eq!(&frames[1].payload()[..36], &wire[64..]);
        assert!(frames[1].payload()[36..].iter().all(|&b| b == 0));

        let mut assembler = FrameAssembler::new(&config).unwrap();
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.as_bytes().to_vec()).collect();
        assert_eq!(assembler.feed(&joined).count(), 2);
    }

    #[test]
    fn short_header_truncates_marker() {
        let frames = frame_payload(&[7, 7], &FrameConfig::new(6, 2)).unwrap();
        assert_eq!(frames[0].as_bytes(), b"ho\x07\x07\x00\x00");
    }

    #[test]
    fn header_only_frames_are_rejected() {
        assert!(frame_payload(&[1], &FrameConfig::new(4, 4)).is_err());
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }
}
