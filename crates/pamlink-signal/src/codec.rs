//! Bit ⇄ symbol mapping.
//!
//! Bytes are split most-significant-bit first and regrouped into k-bit
//! symbols. Encoding zero-pads a trailing partial symbol on the right;
//! decoding discards a trailing group of fewer than 8 bits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};

/// A discrete amplitude level index, always reduced to the alphabet of its width.
pub type Symbol = u8;

/// Number of bits carried by one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolWidth {
    /// Standard PAM4: 2 bits per symbol, levels 0..=3.
    #[default]
    Pam4,
    /// Alternate 3-bit decode path, levels 0..=7.
    Pam8,
}

impl SymbolWidth {
    /// Bits per symbol.
    pub const fn bits(self) -> u32 {
        match self {
            SymbolWidth::Pam4 => 2,
            SymbolWidth::Pam8 => 3,
        }
    }

    /// Number of distinct levels (2^k).
    pub const fn alphabet_size(self) -> u8 {
        1 << self.bits()
    }

    /// Highest valid level.
    pub const fn max_symbol(self) -> Symbol {
        self.alphabet_size() - 1
    }

    /// Reduce an arbitrary value modulo the alphabet size.
    pub const fn reduce(self, value: u8) -> Symbol {
        value & self.max_symbol()
    }
}

impl FromStr for SymbolWidth {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2" | "pam4" => Ok(SymbolWidth::Pam4),
            "3" | "pam8" => Ok(SymbolWidth::Pam8),
            other => Err(SignalError::UnknownSymbolWidth(other.to_string())),
        }
    }
}

impl fmt::Display for SymbolWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolWidth::Pam4 => f.write_str("pam4"),
            SymbolWidth::Pam8 => f.write_str("pam8"),
        }
    }
}

/// Split bytes into `width`-bit symbols, MSB first.
///
/// A trailing partial symbol is zero-padded on the right. Never fails.
pub fn encode(bytes: &[u8], width: SymbolWidth) -> Vec<Symbol> {
    let k = width.bits();
    let mask = u32::from(width.max_symbol());
    let mut out = Vec::with_capacity((bytes.len() * 8).div_ceil(k as usize));

    let mut acc: u32 = 0;
    let mut nbits: u32 = 0;
    for &byte in bytes {
        acc = (acc << 8) | u32::from(byte);
        nbits += 8;
        while nbits >= k {
            nbits -= k;
            out.push(((acc >> nbits) & mask) as Symbol);
        }
        acc &= (1 << nbits) - 1;
    }

    if nbits > 0 {
        out.push(((acc << (k - nbits)) & mask) as Symbol);
    }
    out
}

/// Concatenate symbol bit patterns and cut every 8 bits into a byte.
///
/// Symbols are reduced to the alphabet first. A trailing group of fewer than
/// 8 bits is discarded, not padded.
pub fn decode(symbols: &[Symbol], width: SymbolWidth) -> Vec<u8> {
    let mut packer = BitPacker::with_capacity(symbols.len() * width.bits() as usize / 8);
    for &symbol in symbols {
        packer.push(width.reduce(symbol), width.bits());
    }
    packer.take_bytes()
}

/// Encode the UTF-8 bytes of `text`.
pub fn encode_text(text: &str, width: SymbolWidth) -> Vec<Symbol> {
    encode(text.as_bytes(), width)
}

/// Decode symbols and map every byte to the character with the same code point.
pub fn decode_text(symbols: &[Symbol], width: SymbolWidth) -> String {
    decode(symbols, width).into_iter().map(char::from).collect()
}

/// Fraction of characters in the printable ASCII range (32..127).
///
/// An empty string scores 0.
pub fn printable_score(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let printable = text
        .chars()
        .filter(|ch| (32..127).contains(&u32::from(*ch)))
        .count();
    printable as f64 / total as f64
}

/// Result of [`best_effort_text_guess`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextGuess {
    pub text: String,
    pub width: SymbolWidth,
    pub score: f64,
}

/// Guess whether a symbol stream carries 2-bit or 3-bit encoded text.
///
/// Both decodings are scored with [`printable_score`] and the higher one wins;
/// ties favor 2-bit. This is a heuristic for display, not framing: a stream of
/// binary data will still produce a "best" guess.
pub fn best_effort_text_guess(symbols: &[Symbol]) -> TextGuess {
    let pam4 = decode_text(symbols, SymbolWidth::Pam4);
    let pam4_score = printable_score(&pam4);
    let pam8 = decode_text(symbols, SymbolWidth::Pam8);
    let pam8_score = printable_score(&pam8);

    if pam8_score > pam4_score {
        TextGuess {
            text: pam8,
            width: SymbolWidth::Pam8,
            score: pam8_score,
        }
    } else {
        TextGuess {
            text: pam4,
            width: SymbolWidth::Pam4,
            score: pam4_score,
        }
    }
}

/// Printable score above which a chunk is shown as text.
pub const TEXT_SCORE_THRESHOLD: f64 = 0.6;

/// How a received chunk should be presented.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkView {
    Text(TextGuess),
    Raw(Vec<Symbol>),
}

/// Present a symbol chunk as text when its best guess is mostly printable.
pub fn classify_chunk(symbols: &[Symbol]) -> ChunkView {
    let guess = best_effort_text_guess(symbols);
    if guess.score > TEXT_SCORE_THRESHOLD {
        ChunkView::Text(guess)
    } else {
        ChunkView::Raw(symbols.to_vec())
    }
}

/// Accumulates bit groups and yields whole bytes, MSB first.
///
/// Leftover bits stay buffered across calls so a stream split into arbitrary
/// chunks packs identically to the unsplit stream.
#[derive(Debug, Default, Clone)]
pub struct BitPacker {
    acc: u32,
    nbits: u32,
    out: Vec<u8>,
}

impl BitPacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            acc: 0,
            nbits: 0,
            out: Vec::with_capacity(bytes),
        }
    }

    /// Append the low `bits` bits of `value` (at most 8).
    pub fn push(&mut self, value: u8, bits: u32) {
        debug_assert!(bits <= 8);
        let mask = (1u32 << bits) - 1;
        self.acc = (self.acc << bits) | (u32::from(value) & mask);
        self.nbits += bits;
        if self.nbits >= 8 {
            self.nbits -= 8;
            self.out.push((self.acc >> self.nbits) as u8);
            self.acc &= (1 << self.nbits) - 1;
        }
    }

    /// Remove and return the completed bytes.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    /// Bits waiting for a full byte.
    pub fn pending_bits(&self) -> u32 {
        self.nbits
    }

    /// Flush the partial byte, zero-padded on the right.
    pub fn finish(&mut self) -> Option<u8> {
        if self.nbits == 0 {
            return None;
        }
        let byte = (self.acc << (8 - self.nbits)) as u8;
        self.acc = 0;
        self.nbits = 0;
        Some(byte)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn hi_encodes_to_known_symbols() {
        let symbols = encode_text("HI", SymbolWidth::Pam4);
        assert_eq!(symbols, vec![1, 0, 2, 0, 1, 0, 2, 1]);
        assert_eq!(decode(&symbols, SymbolWidth::Pam4), vec![0x48, 0x49]);
        assert_eq!(decode_text(&symbols, SymbolWidth::Pam4), "HI");
    }

    #[test]
    fn pam8_pads_trailing_symbol() {
        // 0xFF = 111 111 11 -> last symbol padded to 110
        assert_eq!(encode(&[0xFF], SymbolWidth::Pam8), vec![7, 7, 6]);
    }

    #[test]
    fn decode_discards_partial_byte() {
        // 5 PAM4 symbols = 10 bits -> 1 byte, 2 bits dropped
        assert_eq!(decode(&[1, 0, 2, 0, 3], SymbolWidth::Pam4), vec![0x48]);
        assert!(decode(&[3, 3, 3], SymbolWidth::Pam4).is_empty());
    }

    #[test]
    fn decode_reduces_out_of_range_symbols() {
        // 5 = 0b101 reduces to 0b01 for PAM4
        assert_eq!(
            decode(&[5, 0, 2, 0], SymbolWidth::Pam4),
            decode(&[1, 0, 2, 0], SymbolWidth::Pam4)
        );
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(encode(&[], SymbolWidth::Pam4).is_empty());
        assert!(decode(&[], SymbolWidth::Pam8).is_empty());
    }

    #[test]
    fn text_guess_prefers_pam4_for_pam4_text() {
        let guess = best_effort_text_guess(&encode_text("HI", SymbolWidth::Pam4));
        assert_eq!(guess.width, SymbolWidth::Pam4);
        assert_eq!(guess.text, "HI");
        assert_eq!(guess.score, 1.0);
    }

    #[test]
    fn text_guess_picks_pam8_when_it_scores_higher() {
        let symbols = encode_text("hello world", SymbolWidth::Pam8);
        let guess = best_effort_text_guess(&symbols);
        assert_eq!(guess.width, SymbolWidth::Pam8);
        assert_eq!(guess.text, "hello world");
    }

    #[test]
    fn text_guess_of_nothing_defaults_to_pam4() {
        let guess = best_effort_text_guess(&[]);
        assert_eq!(guess.width, SymbolWidth::Pam4);
        assert!(guess.text.is_empty());
    }

    #[test]
    fn classify_chunk_splits_text_from_noise() {
        match classify_chunk(&encode_text("hola", SymbolWidth::Pam4)) {
            ChunkView::Text(guess) => assert_eq!(guess.text, "hola"),
            other => panic!("expected text, got {other:?}"),
        }
        // 0,0,0,0 repeated decodes to NUL bytes under both widths
        assert_eq!(classify_chunk(&[0; 16]), ChunkView::Raw(vec![0; 16]));
    }

    #[test]
    fn printable_score_counts_ascii_range() {
        assert_eq!(printable_score(""), 0.0);
        assert_eq!(printable_score("ab\u{1}\u{2}"), 0.5);
    }

    #[test]
    fn width_parsing() {
        assert_eq!("2".parse::<SymbolWidth>().unwrap(), SymbolWidth::Pam4);
        assert_eq!("PAM8".parse::<SymbolWidth>().unwrap(), SymbolWidth::Pam8);
        assert!(matches!(
            "4".parse::<SymbolWidth>(),
            Err(SignalError::UnknownSymbolWidth(_))
        ));
    }

    #[test]
    fn bit_packer_carries_bits_across_pushes() {
        let mut packer = BitPacker::new();
        packer.push(0b01, 2);
        packer.push(0b00, 2);
        packer.push(0b10, 2);
        assert!(packer.take_bytes().is_empty());
        assert_eq!(packer.pending_bits(), 6);
        packer.push(0b00, 2);
        assert_eq!(packer.take_bytes(), vec![0x48]);
        packer.push(0b11, 2);
        assert_eq!(packer.finish(), Some(0b1100_0000));
        assert_eq!(packer.finish(), None);
    }

    proptest! {
        #[test]
        fn pam4_roundtrip_is_lossless(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let symbols = encode(&bytes, SymbolWidth::Pam4);
            prop_assert_eq!(symbols.len(), bytes.len() * 4);
            prop_assert_eq!(decode(&symbols, SymbolWidth::Pam4), bytes);
        }

        #[test]
        fn pam8_roundtrip_recovers_whole_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let symbols = encode(&bytes, SymbolWidth::Pam8);
            prop_assert!(symbols.iter().all(|s| *s <= 7));
            prop_assert_eq!(decode(&symbols, SymbolWidth::Pam8), bytes);
        }

        #[test]
        fn decode_length_is_floor_of_bits(symbols in proptest::collection::vec(0u8..8, 0..200)) {
            let decoded = decode(&symbols, SymbolWidth::Pam8);
            prop_assert_eq!(decoded.len(), symbols.len() * 3 / 8);
        }
    }
}
