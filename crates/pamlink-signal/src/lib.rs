//! Signal-processing core of the PAM4 link simulator.
//!
//! Everything in this crate is pure and synchronous:
//! - [`codec`] maps bytes to k-bit symbols and back, plus a best-effort text layer
//! - [`wire`] converts symbol sequences to the unpacked or packed byte conventions
//! - [`impairment`] is the closed set of channel defect models
//! - [`demod`] recovers symbol levels from raw amplitude samples without calibration
//! - [`stats`] compares a symbol stream before and after a channel
//!
//! Randomized models take the RNG as an argument so callers decide between
//! seeded (reproducible) and entropy-seeded runs.

pub mod codec;
pub mod demod;
pub mod error;
pub mod impairment;
pub mod noise;
pub mod stats;
pub mod wire;

pub use codec::{
    best_effort_text_guess, classify_chunk, decode, decode_text, encode, encode_text,
    printable_score, BitPacker, ChunkView, Symbol, SymbolWidth, TextGuess, TEXT_SCORE_THRESHOLD,
};
pub use demod::{
    AdaptiveDemodulator, ChannelState, DemodState, DemodulatorConfig, LevelMapping,
    DEFAULT_ALPHA, DEFAULT_WARMUP,
};
pub use error::{Result, SignalError};
pub use impairment::{ImpairmentModel, ImpairmentParams};
pub use stats::SymbolErrorStats;
pub use wire::WireMode;
