use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Subcommand, ValueEnum};
use pamlink_frame::{DEFAULT_FRAME_LEN, DEFAULT_HEADER_LEN};
use pamlink_relay::{Stage, DEFAULT_FALLBACK_SLOT, DEFAULT_SLOT_CAPACITY};
use pamlink_signal::{LevelMapping, Symbol, SymbolWidth, WireMode};
use pamlink_transport::ForwardTarget;

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod admin;
pub mod codec;
pub mod listen;
pub mod relay;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a relay node.
    Relay(RelayArgs),
    /// Transmit text, a file or raw symbols to one or more hops.
    Send(SendArgs),
    /// Accept sources and print what they send.
    Listen(ListenArgs),
    /// Run the administrator control server.
    Admin(AdminArgs),
    /// Encode text to symbols offline.
    Encode(EncodeArgs),
    /// Decode symbols to bytes offline.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Relay(args) => relay::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Admin(args) => admin::run(args, format),
        Command::Encode(args) => codec::encode(args, format),
        Command::Decode(args) => codec::decode(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// JSON node configuration; flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Address sources connect to.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,
    /// Forward destination (repeatable or comma-separated).
    #[arg(long, value_name = "HOST:PORT", value_delimiter = ',')]
    pub forward: Vec<ForwardTarget>,
    /// Pipeline stage: forward, frames or demodulate.
    #[arg(long)]
    pub stage: Option<Stage>,
    /// Wire convention: unpacked or packed.
    #[arg(long)]
    pub wire_mode: Option<WireMode>,
    /// Symbol width: pam4 or pam8.
    #[arg(long)]
    pub width: Option<SymbolWidth>,
    /// Impairment model name.
    #[arg(long, value_name = "NAME")]
    pub impairment: Option<String>,
    /// Impairment parameter, e.g. prob=0.2 (repeatable).
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, f64)>,
    /// Start with impairment injection enabled.
    #[arg(long)]
    pub error_mode: bool,
    #[arg(long)]
    pub frame_len: Option<usize>,
    #[arg(long)]
    pub header_len: Option<usize>,
    /// Demodulator smoothing factor.
    #[arg(long)]
    pub alpha: Option<f64>,
    /// Demodulator calibration samples.
    #[arg(long)]
    pub warmup: Option<usize>,
    /// Level to bit mapping: gray or natural.
    #[arg(long)]
    pub level_mapping: Option<LevelMapping>,
    /// Logical channel slots.
    #[arg(long)]
    pub slots: Option<usize>,
    /// Slot shared by sources beyond capacity.
    #[arg(long)]
    pub fallback_slot: Option<usize>,
    /// Administrator control server.
    #[arg(long, value_name = "HOST:PORT")]
    pub control: Option<ForwardTarget>,
    /// Seed for reproducible impairments.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Destinations.
    #[arg(required = true, value_name = "HOST:PORT")]
    pub targets: Vec<ForwardTarget>,
    /// Text payload.
    #[arg(long, conflicts_with_all = ["file", "symbols"])]
    pub text: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["text", "symbols"])]
    pub file: Option<PathBuf>,
    /// Raw symbol values, comma-separated.
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["text", "file"])]
    pub symbols: Option<Vec<Symbol>>,
    #[arg(long, default_value = "pam4")]
    pub width: SymbolWidth,
    #[arg(long, default_value = "unpacked")]
    pub wire_mode: WireMode,
    /// Wrap the wire bytes in fixed-length marker frames.
    #[arg(long)]
    pub frames: bool,
    #[arg(long, default_value_t = DEFAULT_FRAME_LEN)]
    pub frame_len: usize,
    #[arg(long, default_value_t = DEFAULT_HEADER_LEN)]
    pub header_len: usize,
    /// Number of times to send the payload.
    #[arg(long, default_value = "1")]
    pub repeat: u32,
    /// Pause between repeats (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Delay between connection attempts.
    #[arg(long, default_value = "1s")]
    pub retry_delay: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind.
    pub listen: SocketAddr,
    #[arg(long, default_value = "unpacked")]
    pub wire_mode: WireMode,
    /// Reassemble frames of this length and print their payloads.
    #[arg(long)]
    pub frame_len: Option<usize>,
    #[arg(long, default_value_t = DEFAULT_HEADER_LEN)]
    pub header_len: usize,
    #[arg(long, default_value_t = DEFAULT_SLOT_CAPACITY)]
    pub slots: usize,
    #[arg(long, default_value_t = DEFAULT_FALLBACK_SLOT)]
    pub fallback_slot: usize,
    /// Exit after printing N chunks.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Args, Debug)]
pub struct AdminArgs {
    /// Address relays dial.
    pub listen: SocketAddr,
    /// Error mode to command each relay into when it connects.
    #[arg(long, value_enum)]
    pub set: Option<Toggle>,
    /// Wire convention used to render reported chunks.
    #[arg(long, default_value = "unpacked")]
    pub wire_mode: WireMode,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Text to encode.
    pub text: String,
    #[arg(long, default_value = "pam4")]
    pub width: SymbolWidth,
    #[arg(long, default_value = "unpacked")]
    pub wire_mode: WireMode,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Symbols, comma-separated.
    #[arg(required = true, value_delimiter = ',')]
    pub symbols: Vec<Symbol>,
    /// Symbol width. Omit to guess between pam4 and pam8.
    #[arg(long)]
    pub width: Option<SymbolWidth>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_param(raw: &str) -> Result<(String, f64), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("invalid value for {key}: {err}"))?;
    Ok((key.trim().to_string(), value))
}

/// Running flag cleared by Ctrl-C.
pub fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_parsing() {
        assert_eq!(parse_param("prob=0.25").unwrap(), ("prob".to_string(), 0.25));
        assert_eq!(parse_param(" shift = 2 ").unwrap(), ("shift".to_string(), 2.0));
        assert!(parse_param("prob").is_err());
        assert!(parse_param("prob=lots").is_err());
    }
}
