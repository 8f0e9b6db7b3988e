//! Output formatting for CLI

use kestrel_core::{PreCacheReport, SessionEvent};
use serde::Serialize;
use serde_json::Value;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

/// One line of a script transcript
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct TranscriptRow {
    pub step: usize,
    pub kind: String,
    pub detail: String,
}

impl TranscriptRow {
    pub fn call(step: usize, method: &str, result: &kestrel_core::Result<Value>) -> Self {
        let detail = match result {
            Ok(Value::Null) => format!("{method} -> ok"),
            Ok(value) => format!("{method} -> {value}"),
            Err(e) => format!("{method} -> error: {e}"),
        };
        Self {
            step,
            kind: "call".to_string(),
            detail,
        }
    }

    pub fn event(step: usize, texture_id: i64, event: &SessionEvent) -> Self {
        let body = serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}"));
        Self {
            step,
            kind: format!("event[{texture_id}]"),
            detail: body,
        }
    }

    pub fn note(step: usize, kind: &str, detail: impl Into<String>) -> Self {
        Self {
            step,
            kind: kind.to_string(),
            detail: detail.into(),
        }
    }
}

/// Prints a transcript in the selected format
pub fn print_transcript(rows: &[TranscriptRow], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Table => println!("{}", Table::new(rows)),
        OutputFormat::Text => {
            for row in rows {
                println!("{:>4}  {:<12} {}", row.step, row.kind, row.detail);
            }
        }
    }
    Ok(())
}

pub fn print_report(url: &str, report: &PreCacheReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Table => {
            let rows = vec![
                TranscriptRow::note(0, "playlists", report.playlists.to_string()),
                TranscriptRow::note(0, "segments", report.segments.to_string()),
                TranscriptRow::note(0, "failed", report.failed.to_string()),
                TranscriptRow::note(0, "bytes", report.bytes.to_string()),
            ];
            println!("{}", Table::new(rows));
        }
        OutputFormat::Text => {
            println!("Pre-cached {url}");
            println!("  Playlists: {}", report.playlists);
            println!("  Segments:  {}", report.segments);
            println!("  Failed:    {}", report.failed);
            println!("  Bytes:     {}", report.bytes);
        }
    }
    Ok(())
}

/// Prints a single value; text output uses `text` as is
pub fn print_value<T: Serialize>(value: &T, text: &str, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Table => {
            println!("{}", serde_json::to_string_pretty(value)?)
        }
        OutputFormat::Text => println!("{text}"),
    }
    Ok(())
}
