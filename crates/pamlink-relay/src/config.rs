use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use pamlink_frame::{FrameConfig, DEFAULT_FRAME_LEN, DEFAULT_HEADER_LEN};
use pamlink_signal::{
    DemodulatorConfig, ImpairmentModel, ImpairmentParams, LevelMapping, SymbolWidth, WireMode,
};
use pamlink_transport::{ForwardTarget, ForwarderConfig};
use serde::{Deserialize, Serialize};

use crate::binding::{SourceBinding, DEFAULT_FALLBACK_SLOT, DEFAULT_SLOT_CAPACITY};
use crate::error::{RelayError, Result};

/// Default relay listening port.
pub const DEFAULT_LISTEN_PORT: u16 = 5050;

/// What a node does with each inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Impair (when error mode is on) and fan out each received chunk.
    #[default]
    Forward,
    /// Reassemble fixed-length frames and fan out one write per frame.
    Frames,
    /// Classify raw amplitude samples into levels and fan out the packed bits.
    Demodulate,
}

impl FromStr for Stage {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Stage::Forward),
            "frames" => Ok(Stage::Frames),
            "demodulate" | "demod" => Ok(Stage::Demodulate),
            other => Err(RelayError::InvalidConfig(format!(
                "unknown stage {other:?} (expected forward, frames or demodulate)"
            ))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Forward => "forward",
            Stage::Frames => "frames",
            Stage::Demodulate => "demodulate",
        })
    }
}

/// Impairment model as written in configuration: a free-form name plus
/// named parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpairmentSpec {
    pub name: String,
    pub params: ImpairmentParams,
}

impl ImpairmentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: ImpairmentParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Resolve to a model. Unknown names give the identity model.
    pub fn resolve(&self) -> ImpairmentModel {
        ImpairmentModel::from_name(&self.name, &self.params)
    }
}

impl Default for ImpairmentSpec {
    fn default() -> Self {
        Self::new("identity")
    }
}

/// Startup configuration of one relay node.
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes. Durations are given in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address inbound sources connect to.
    pub listen: SocketAddr,
    /// Destinations every processed chunk is fanned out to.
    pub forward: Vec<ForwardTarget>,
    pub stage: Stage,
    pub wire_mode: WireMode,
    pub symbol_width: SymbolWidth,
    pub impairment: ImpairmentSpec,
    /// Whether impairment injection starts enabled.
    pub error_mode: bool,
    pub frame_len: usize,
    pub header_len: usize,
    pub demod: DemodulatorConfig,
    pub level_mapping: LevelMapping,
    pub slots: usize,
    pub fallback_slot: usize,
    /// Administrator control server to announce to and report to.
    pub control: Option<ForwardTarget>,
    pub accept_poll_ms: u64,
    pub read_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub control_reconnect_ms: u64,
    /// Seed for impairment randomness; each connection derives its own stream.
    pub seed: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_LISTEN_PORT)),
            forward: Vec::new(),
            stage: Stage::default(),
            wire_mode: WireMode::default(),
            symbol_width: SymbolWidth::default(),
            impairment: ImpairmentSpec::default(),
            error_mode: false,
            frame_len: DEFAULT_FRAME_LEN,
            header_len: DEFAULT_HEADER_LEN,
            demod: DemodulatorConfig::default(),
            level_mapping: LevelMapping::default(),
            slots: DEFAULT_SLOT_CAPACITY,
            fallback_slot: DEFAULT_FALLBACK_SLOT,
            control: None,
            accept_poll_ms: 200,
            read_timeout_ms: 250,
            retry_delay_ms: 1_000,
            connect_timeout_ms: 3_000,
            control_reconnect_ms: 5_000,
            seed: None,
        }
    }
}

impl RelayConfig {
    /// Parse a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RelayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        self.frame_config().validate()?;
        SourceBinding::new(self.slots, self.fallback_slot)?;
        if !(0.0..=1.0).contains(&self.demod.alpha) {
            return Err(RelayError::InvalidConfig(format!(
                "demodulator alpha {} outside [0, 1]",
                self.demod.alpha
            )));
        }
        if self.wire_mode == WireMode::Packed && self.symbol_width != SymbolWidth::Pam4 {
            return Err(RelayError::InvalidConfig(
                "packed wire mode carries 2-bit symbols only".to_string(),
            ));
        }
        Ok(())
    }

    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig::new(self.frame_len, self.header_len)
    }

    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            connect_timeout: Some(Duration::from_millis(self.connect_timeout_ms)),
            ..ForwarderConfig::default()
        }
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn control_reconnect(&self) -> Duration {
        Duration::from_millis(self.control_reconnect_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = RelayConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.frame_len, 68);
        assert_eq!(config.slots, 3);
        assert_eq!(config.fallback_slot, 1);
        assert_eq!(config.impairment.resolve(), ImpairmentModel::Identity);
    }

    #[test]
    fn parses_full_node() {
        let config = RelayConfig::from_json_str(
            r#"{
                "listen": "127.0.0.1:5001",
                "forward": ["10.0.0.243:5052", "viewer:8100"],
                "stage": "forward",
                "wire_mode": "packed",
                "impairment": {"name": "gauss", "params": {"sigma": 0.8}},
                "error_mode": true,
                "control": "10.0.0.9:6000",
                "seed": 7
            }"#,
        )
        .unwrap();

        assert_eq!(config.listen.port(), 5001);
        assert_eq!(config.forward.len(), 2);
        assert_eq!(config.forward[1], ForwardTarget::new("viewer", 8100));
        assert_eq!(config.wire_mode, WireMode::Packed);
        assert!(config.error_mode);
        assert_eq!(
            config.impairment.resolve(),
            ImpairmentModel::AdditiveNoise { sigma: 0.8 }
        );
        assert_eq!(config.control, Some(ForwardTarget::new("10.0.0.9", 6000)));
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn unknown_impairment_degrades_to_identity() {
        let config =
            RelayConfig::from_json_str(r#"{"impairment": {"name": "cosmic_rays"}}"#).unwrap();
        assert!(config.impairment.resolve().is_identity());
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(RelayConfig::from_json_str(r#"{"frame_len": 0}"#).is_err());
        assert!(RelayConfig::from_json_str(r#"{"frame_len": 2, "header_len": 4}"#).is_err());
        assert!(RelayConfig::from_json_str(r#"{"slots": 2, "fallback_slot": 3}"#).is_err());
        assert!(
            RelayConfig::from_json_str(r#"{"wire_mode": "packed", "symbol_width": "pam8"}"#)
                .is_err()
        );
        assert!(RelayConfig::from_json_str(r#"{"forward": ["no-port"]}"#).is_err());
    }

    #[test]
    fn stage_names() {
        assert_eq!("demod".parse::<Stage>().unwrap(), Stage::Demodulate);
        assert_eq!(Stage::Frames.to_string(), "frames");
        assert!("mirror".parse::<Stage>().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let mut config = RelayConfig::default();
        config.forward.push(ForwardTarget::new("127.0.0.1", 9000));
        config.impairment = ImpairmentSpec::new("simbolos").with_param("prob", 0.3);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(RelayConfig::from_json_str(&json).unwrap(), config);
    }
}
