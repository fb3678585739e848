//! Byte-stream conventions for carrying symbols over TCP.
//!
//! Hops are configured with one mode each; the mode is never auto-detected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::Symbol;
use crate::error::{Result, SignalError};

/// Symbols carried per byte in packed mode.
pub const SYMBOLS_PER_PACKED_BYTE: usize = 4;

/// How symbols are laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    /// One symbol per byte.
    #[default]
    Unpacked,
    /// Four 2-bit symbols per byte, first symbol in the most significant pair.
    Packed,
}

impl WireMode {
    /// Lay `symbols` out as wire bytes.
    ///
    /// In packed mode each symbol is masked to 2 bits and a trailing partial
    /// group is zero-padded.
    pub fn to_wire(self, symbols: &[Symbol]) -> Vec<u8> {
        match self {
            WireMode::Unpacked => symbols.to_vec(),
            WireMode::Packed => symbols
                .chunks(SYMBOLS_PER_PACKED_BYTE)
                .map(|group| {
                    group.iter().enumerate().fold(0u8, |byte, (i, symbol)| {
                        byte | ((symbol & 0b11) << (6 - 2 * i))
                    })
                })
                .collect(),
        }
    }

    /// Recover the symbol sequence from wire bytes.
    pub fn from_wire(self, bytes: &[u8]) -> Vec<Symbol> {
        match self {
            WireMode::Unpacked => bytes.to_vec(),
            WireMode::Packed => bytes
                .iter()
                .flat_map(|byte| [byte >> 6, (byte >> 4) & 0b11, (byte >> 2) & 0b11, byte & 0b11])
                .collect(),
        }
    }
}

impl FromStr for WireMode {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unpacked" => Ok(WireMode::Unpacked),
            "packed" => Ok(WireMode::Packed),
            other => Err(SignalError::UnknownWireMode(other.to_string())),
        }
    }
}

impl fmt::Display for WireMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireMode::Unpacked => f.write_str("unpacked"),
            WireMode::Packed => f.write_str("packed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layout_is_msb_first() {
        assert_eq!(WireMode::Packed.to_wire(&[1, 0, 2, 0]), vec![0x48]);
        assert_eq!(WireMode::Packed.from_wire(&[0x49]), vec![1, 0, 2, 1]);
    }

    #[test]
    fn packed_pads_partial_group() {
        assert_eq!(WireMode::Packed.to_wire(&[3, 3]), vec![0b1111_0000]);
    }

    #[test]
    fn unpacked_is_passthrough() {
        let bytes = [0, 1, 2, 3, 200];
        assert_eq!(WireMode::Unpacked.from_wire(&bytes), bytes.to_vec());
        assert_eq!(WireMode::Unpacked.to_wire(&bytes), bytes.to_vec());
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("Packed".parse::<WireMode>().unwrap(), WireMode::Packed);
        assert!("dense".parse::<WireMode>().is_err());
    }
}
