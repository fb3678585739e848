//! Channel impairment models.
//!
//! A model is resolved once from a name plus named parameters and then applied
//! to any number of symbol sequences. Application is stateless apart from the
//! RNG handed in by the caller.

use std::collections::BTreeMap;
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::codec::{Symbol, SymbolWidth};
use crate::noise::GaussianSource;
use crate::wire::WireMode;

/// Named numeric parameters, e.g. `{"prob": 0.2}`.
pub type ImpairmentParams = BTreeMap<String, f64>;

pub const DEFAULT_SUBSTITUTION_PROB: f64 = 0.1;
pub const DEFAULT_NOISE_SIGMA: f64 = 0.5;
pub const DEFAULT_ATTENUATION_FACTOR: f64 = 0.8;
pub const DEFAULT_OFFSET_SHIFT: i64 = 1;

/// Common multiple of every alphabet size; shifts are stored modulo this.
const OFFSET_PERIOD: f64 = 8.0;

/// The closed set of channel defects.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ImpairmentModel {
    /// Input returned unmodified.
    #[default]
    Identity,
    /// Each symbol is replaced, with probability `prob`, by a different level.
    SymbolSubstitution { prob: f64 },
    /// Zero-mean Gaussian noise of width `sigma`, re-quantized to the alphabet.
    AdditiveNoise { sigma: f64 },
    /// Levels scaled by `factor` and truncated toward zero.
    Attenuation { factor: f64 },
    /// Levels shifted by `shift` modulo the alphabet size.
    CyclicOffset { shift: i64 },
    /// First symbol duplicated at the front, last symbol dropped.
    Jitter,
    /// Symbol order randomly permuted.
    Shuffle,
}

impl ImpairmentModel {
    /// Resolve a model from a free-form name and its parameters.
    ///
    /// Unknown names resolve to [`ImpairmentModel::Identity`]. Missing
    /// parameters take their defaults; out-of-range probabilities are clamped
    /// to `[0, 1]` and negative or non-finite sigmas are treated as zero.
    pub fn from_name(name: &str, params: &ImpairmentParams) -> Self {
        let param = |keys: &[&str], default: f64| {
            keys.iter()
                .find_map(|key| params.get(*key).copied())
                .unwrap_or(default)
        };

        match name.trim().to_ascii_lowercase().as_str() {
            "identity" | "ideal" | "none" => ImpairmentModel::Identity,
            "symbol_substitution" | "substitution" | "simbolos" => {
                let prob = param(&["prob", "prob_error"], DEFAULT_SUBSTITUTION_PROB);
                ImpairmentModel::SymbolSubstitution {
                    prob: if prob.is_nan() { 0.0 } else { prob.clamp(0.0, 1.0) },
                }
            }
            "additive_noise" | "noise" | "gauss" => {
                let sigma = param(&["sigma"], DEFAULT_NOISE_SIGMA);
                ImpairmentModel::AdditiveNoise {
                    sigma: if sigma.is_finite() { sigma.max(0.0) } else { 0.0 },
                }
            }
            "attenuation" | "atenuacion" => ImpairmentModel::Attenuation {
                factor: param(&["factor"], DEFAULT_ATTENUATION_FACTOR),
            },
            "cyclic_offset" | "offset" => {
                let shift = param(&["shift", "offset"], DEFAULT_OFFSET_SHIFT as f64);
                ImpairmentModel::CyclicOffset {
                    shift: if shift.is_finite() {
                        (shift.trunc() % OFFSET_PERIOD) as i64
                    } else {
                        DEFAULT_OFFSET_SHIFT
                    },
                }
            }
            "jitter" => ImpairmentModel::Jitter,
            "shuffle" | "reordenar" => ImpairmentModel::Shuffle,
            other => {
                warn!(model = other, "unknown impairment model; using identity");
                ImpairmentModel::Identity
            }
        }
    }

    /// Canonical model name.
    pub fn name(&self) -> &'static str {
        match self {
            ImpairmentModel::Identity => "identity",
            ImpairmentModel::SymbolSubstitution { .. } => "symbol_substitution",
            ImpairmentModel::AdditiveNoise { .. } => "additive_noise",
            ImpairmentModel::Attenuation { .. } => "attenuation",
            ImpairmentModel::CyclicOffset { .. } => "cyclic_offset",
            ImpairmentModel::Jitter => "jitter",
            ImpairmentModel::Shuffle => "shuffle",
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, ImpairmentModel::Identity)
    }

    /// Apply the model to a symbol sequence.
    ///
    /// Value-mutating models leave values above `width.max_symbol()` untouched;
    /// they are not symbols of this alphabet. Length is always preserved.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        symbols: &[Symbol],
        width: SymbolWidth,
        rng: &mut R,
    ) -> Vec<Symbol> {
        let max = width.max_symbol();
        let in_alphabet = |symbol: Symbol| symbol <= max;

        match self {
            ImpairmentModel::Identity => symbols.to_vec(),
            ImpairmentModel::SymbolSubstitution { prob } => symbols
                .iter()
                .map(|&symbol| {
                    if !in_alphabet(symbol) || rng.gen::<f64>() >= *prob {
                        return symbol;
                    }
                    // Uniform over the other max levels, skipping the original.
                    let pick = rng.gen_range(0..max);
                    if pick >= symbol {
                        pick + 1
                    } else {
                        pick
                    }
                })
                .collect(),
            ImpairmentModel::AdditiveNoise { sigma } => {
                let mut gauss = GaussianSource::new();
                symbols
                    .iter()
                    .map(|&symbol| {
                        if !in_alphabet(symbol) {
                            return symbol;
                        }
                        let noisy = f64::from(symbol) + gauss.next_scaled(rng, *sigma);
                        noisy.clamp(0.0, f64::from(max)).round() as Symbol
                    })
                    .collect()
            }
            ImpairmentModel::Attenuation { factor } => symbols
                .iter()
                .map(|&symbol| {
                    if !in_alphabet(symbol) {
                        return symbol;
                    }
                    let scaled = (f64::from(symbol) * factor).trunc();
                    scaled.clamp(0.0, f64::from(max)) as Symbol
                })
                .collect(),
            ImpairmentModel::CyclicOffset { shift } => {
                let size = i64::from(width.alphabet_size());
                let shift = shift.rem_euclid(size);
                symbols
                    .iter()
                    .map(|&symbol| {
                        if !in_alphabet(symbol) {
                            return symbol;
                        }
                        ((i64::from(symbol) + shift) % size) as Symbol
                    })
                    .collect()
            }
            ImpairmentModel::Jitter => match symbols.split_last() {
                Some((_, rest)) if !rest.is_empty() => {
                    let mut out = Vec::with_capacity(symbols.len());
                    out.push(symbols[0]);
                    out.extend_from_slice(rest);
                    out
                }
                _ => symbols.to_vec(),
            },
            ImpairmentModel::Shuffle => {
                let mut out = symbols.to_vec();
                out.shuffle(rng);
                out
            }
        }
    }

    /// Apply the model to wire bytes in the given mode.
    ///
    /// Packed bytes are unpacked to 2-bit symbols, impaired and repacked, so
    /// `width` is ignored in that mode.
    pub fn apply_wire<R: Rng + ?Sized>(
        &self,
        bytes: &[u8],
        mode: WireMode,
        width: SymbolWidth,
        rng: &mut R,
    ) -> Vec<u8> {
        if self.is_identity() {
            return bytes.to_vec();
        }
        let width = match mode {
            WireMode::Packed => SymbolWidth::Pam4,
            WireMode::Unpacked => width,
        };
        let symbols = mode.from_wire(bytes);
        let impaired = self.apply(&symbols, width, rng);
        debug!(model = self.name(), symbols = symbols.len(), "applied impairment");
        mode.to_wire(&impaired)
    }
}

impl fmt::Display for ImpairmentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpairmentModel::SymbolSubstitution { prob } => write!(f, "{}(prob={prob})", self.name()),
            ImpairmentModel::AdditiveNoise { sigma } => write!(f, "{}(sigma={sigma})", self.name()),
            ImpairmentModel::Attenuation { factor } => write!(f, "{}(factor={factor})", self.name()),
            ImpairmentModel::CyclicOffset { shift } => write!(f, "{}(shift={shift})", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}
