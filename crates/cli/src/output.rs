//! Output formatting for CLI commands.
//!
//! Every command renders either a human-readable report or, with `--output json`, the raw
//! response message serialised as JSON. Writers are generic so rendering can be tested without
//! touching stdout.

use api_shared::pb;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::io::{self, Write};

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

/// Renders a byte count as `B`, `KB`, `MB` or `GB`, with two decimals above one kilobyte.
pub fn format_size(bytes: u64) -> String {
    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}

/// Renders Unix seconds in local time. Out-of-range values fall back to the raw number.
pub fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.with_timezone(&Local).format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| secs.to_string())
}

pub fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    writeln!(out, "{}", json)
}

/// File listing sorted by filename.
pub fn write_file_list<W: Write>(
    out: &mut W,
    mut files: Vec<pb::FileInfo>,
    format: OutputFormat,
) -> io::Result<()> {
    files.sort_by(|a, b| a.filename.cmp(&b.filename));

    if format == OutputFormat::Json {
        return write_json(out, &files);
    }

    if files.is_empty() {
        return writeln!(out, "No files found");
    }

    writeln!(out, "{:<40} {:>15} {:>20}", "FILENAME", "SIZE", "MODIFIED")?;
    writeln!(out, "{}", "-".repeat(77))?;
    for file in &files {
        writeln!(
            out,
            "{:<40} {:>15} {:>20}",
            file.filename,
            format_size(file.size),
            format_timestamp(file.modified_at)
        )?;
    }
    writeln!(out)?;
    writeln!(out, "Total: {} file(s)", files.len())
}

pub fn write_stat<W: Write>(
    out: &mut W,
    filename: &str,
    response: &pb::StatResponse,
    format: OutputFormat,
) -> io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, response);
    }

    let file = match (&response.file, response.exists) {
        (Some(file), true) => file,
        _ => return writeln!(out, "File '{}' does not exist", filename),
    };

    writeln!(out, "Filename: {}", file.filename)?;
    writeln!(out, "Size:     {} ({} bytes)", format_size(file.size), file.size)?;
    writeln!(out, "Created:  {}", format_timestamp(file.created_at))?;
    writeln!(out, "Modified: {}", format_timestamp(file.modified_at))
}

pub fn write_delete<W: Write>(
    out: &mut W,
    filename: &str,
    response: &pb::DeleteResponse,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => write_json(out, response),
        OutputFormat::Table if response.success => writeln!(out, "Deleted '{}'", filename),
        OutputFormat::Table => writeln!(out, "Failed to delete: {}", response.message),
    }
}
