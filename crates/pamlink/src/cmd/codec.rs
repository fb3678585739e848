use pamlink_signal::{best_effort_text_guess, decode as decode_symbols, encode_text, Symbol};
use serde::Serialize;

use crate::cmd::{DecodeArgs, EncodeArgs};
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_record, symbols_list, OutputFormat, Record};

#[derive(Debug, Serialize)]
struct Encoded {
    width: String,
    wire_mode: String,
    symbols: Vec<Symbol>,
    wire: String,
    #[serde(skip)]
    wire_bytes: Vec<u8>,
}

impl Record for Encoded {
    fn columns(&self) -> Vec<(&'static str, String)> {
        vec![
            ("width", self.width.clone()),
            ("wire_mode", self.wire_mode.clone()),
            ("symbols", symbols_list(&self.symbols)),
            ("wire", self.wire.clone()),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        self.wire_bytes.clone()
    }
}

#[derive(Debug, Serialize)]
struct Decoded {
    width: String,
    guessed: bool,
    bytes: String,
    text: String,
    score: f64,
    #[serde(skip)]
    raw_bytes: Vec<u8>,
}

impl Record for Decoded {
    fn columns(&self) -> Vec<(&'static str, String)> {
        vec![
            ("width", self.width.clone()),
            ("guessed", self.guessed.to_string()),
            ("bytes", self.bytes.clone()),
            ("text", self.text.clone()),
            ("score", format!("{:.2}", self.score)),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        self.raw_bytes.clone()
    }
}

pub fn encode(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    print_record(&encode_record(&args)?, format);
    Ok(SUCCESS)
}

pub fn decode(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    print_record(&decode_record(&args), format);
    Ok(SUCCESS)
}

fn encode_record(args: &EncodeArgs) -> CliResult<Encoded> {
    if args.wire_mode == pamlink_signal::WireMode::Packed
        && args.width != pamlink_signal::SymbolWidth::Pam4
    {
        return Err(CliError::new(
            USAGE,
            "packed wire mode carries 2-bit symbols only",
        ));
    }
    let symbols = encode_text(&args.text, args.width);
    let wire_bytes = args.wire_mode.to_wire(&symbols);
    Ok(Encoded {
        width: args.width.to_string(),
        wire_mode: args.wire_mode.to_string(),
        wire: hex::encode(&wire_bytes),
        symbols,
        wire_bytes,
    })
}

fn decode_record(args: &DecodeArgs) -> Decoded {
    let (width, guessed) = match args.width {
        Some(width) => (width, false),
        None => (best_effort_text_guess(&args.symbols).width, true),
    };
    let raw_bytes = decode_symbols(&args.symbols, width);
    let text: String = raw_bytes.iter().copied().map(char::from).collect();
    Decoded {
        width: width.to_string(),
        guessed,
        bytes: hex::encode(&raw_bytes),
        score: pamlink_signal::printable_score(&text),
        text,
        raw_bytes,
    }
}

#[cfg(test)]
mod tests {
    use pamlink_signal::{SymbolWidth, WireMode};

    use super::*;

    #[test]
    fn encodes_hi_both_wire_modes() {
        let unpacked = encode_record(&EncodeArgs {
            text: "HI".to_string(),
            width: SymbolWidth::Pam4,
            wire_mode: WireMode::Unpacked,
        })
        .unwrap();
        assert_eq!(unpacked.symbols, vec![1, 0, 2, 0, 1, 0, 2, 1]);
        assert_eq!(unpacked.wire, "0100020001000201");

        let packed = encode_record(&EncodeArgs {
            text: "HI".to_string(),
            width: SymbolWidth::Pam4,
            wire_mode: WireMode::Packed,
        })
        .unwrap();
        assert_eq!(packed.wire, "4849");
        assert_eq!(packed.raw(), b"HI".to_vec());
    }

    #[test]
    fn packed_pam8_is_rejected() {
        let err = encode_record(&EncodeArgs {
            text: "HI".to_string(),
            width: SymbolWidth::Pam8,
            wire_mode: WireMode::Packed,
        })
        .unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn decodes_with_explicit_width() {
        let decoded = decode_record(&DecodeArgs {
            symbols: vec![1, 0, 2, 0, 1, 0, 2, 1],
            width: Some(SymbolWidth::Pam4),
        });
        assert_eq!(decoded.text, "HI");
        assert_eq!(decoded.bytes, "4849");
        assert!(!decoded.guessed);
    }

    #[test]
    fn guesses_width_when_omitted() {
        let symbols = pamlink_signal::encode_text("hola", SymbolWidth::Pam8);
        let decoded = decode_record(&DecodeArgs {
            symbols,
            width: None,
        });
        assert!(decoded.guessed);
        assert_eq!(decoded.width, "pam8");
        assert_eq!(decoded.text, "hola");
    }
}
