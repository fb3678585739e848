use pamlink_relay::{ImpairmentSpec, NodeStats, RelayConfig, RelayNode};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, RelayArgs};
use crate::exit::{relay_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat, Record};

pub fn run(args: RelayArgs, format: OutputFormat) -> CliResult<i32> {
    let config = build_config(args)?;
    let running = install_ctrlc_handler()?;

    let node = RelayNode::new(config, running).map_err(|err| relay_error("relay setup failed", err))?;
    node.run().map_err(|err| relay_error("relay failed", err))?;

    let stats = node.stats();
    info!(
        connections = stats.connections,
        hops = stats.hops,
        forward_failures = stats.forward_failures,
        "relay exiting"
    );
    print_record(&stats, format);
    Ok(SUCCESS)
}

/// Config file (or defaults) with command-line overrides applied.
fn build_config(args: RelayArgs) -> CliResult<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            RelayConfig::from_json_file(path).map_err(|err| relay_error("config load failed", err))?
        }
        None => RelayConfig::default(),
    };

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if !args.forward.is_empty() {
        config.forward = args.forward;
    }
    if let Some(stage) = args.stage {
        config.stage = stage;
    }
    if let Some(mode) = args.wire_mode {
        config.wire_mode = mode;
    }
    if let Some(width) = args.width {
        config.symbol_width = width;
    }
    if let Some(name) = args.impairment {
        config.impairment = ImpairmentSpec::new(name);
    }
    for (key, value) in args.params {
        config.impairment.params.insert(key, value);
    }
    if args.error_mode {
        config.error_mode = true;
    }
    if let Some(frame_len) = args.frame_len {
        config.frame_len = frame_len;
    }
    if let Some(header_len) = args.header_len {
        config.header_len = header_len;
    }
    if let Some(alpha) = args.alpha {
        config.demod.alpha = alpha;
    }
    if let Some(warmup) = args.warmup {
        config.demod.warmup = warmup;
    }
    if let Some(mapping) = args.level_mapping {
        config.level_mapping = mapping;
    }
    if let Some(slots) = args.slots {
        config.slots = slots;
    }
    if let Some(fallback) = args.fallback_slot {
        config.fallback_slot = fallback;
    }
    if args.control.is_some() {
        config.control = args.control;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    config
        .validate()
        .map_err(|err| relay_error("invalid relay configuration", err))?;
    Ok(config)
}

impl Record for NodeStats {
    fn columns(&self) -> Vec<(&'static str, String)> {
        vec![
            ("connections", self.connections.to_string()),
            ("bytes_in", self.bytes_in.to_string()),
            ("hops", self.hops.to_string()),
            ("forward_failures", self.forward_failures.to_string()),
        ]
    }
}
