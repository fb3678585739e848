use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pamlink_signal::{ChunkView, Symbol};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A printable command result.
///
/// JSON uses the `Serialize` impl; table and pretty use [`Record::columns`];
/// raw writes [`Record::raw`] bytes untouched.
pub trait Record: Serialize {
    fn columns(&self) -> Vec<(&'static str, String)>;

    fn raw(&self) -> Vec<u8> {
        Vec::new()
    }
}

pub fn print_record<R: Record>(record: &R, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let columns = record.columns();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(columns.iter().map(|(name, _)| name.to_ascii_uppercase()))
                .add_row(columns.into_iter().map(|(_, value)| value));
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line = record
                .columns()
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
        OutputFormat::Raw => print_raw(&record.raw()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Comma-separated symbol list, e.g. `1,0,2,0`.
pub fn symbols_list(symbols: &[Symbol]) -> String {
    symbols
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Human rendering of a received chunk.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChunkText {
    Text { text: String, width: String, score: f64 },
    Raw { symbols: Vec<Symbol> },
}

impl From<ChunkView> for ChunkText {
    fn from(view: ChunkView) -> Self {
        match view {
            ChunkView::Text(guess) => ChunkText::Text {
                text: guess.text,
                width: guess.width.to_string(),
                score: guess.score,
            },
            ChunkView::Raw(symbols) => ChunkText::Raw { symbols },
        }
    }
}

impl ChunkText {
    pub fn summary(&self) -> String {
        match self {
            ChunkText::Text { text, width, .. } => format!("[{width}] {text}"),
            ChunkText::Raw { symbols } => format!("[raw] {}", symbols_list(symbols)),
        }
    }
}

pub fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
