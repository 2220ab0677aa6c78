//! Loading recorded notification payloads.
//!
//! Two line formats are accepted:
//!
//! - plain hex dumps, with or without `-`, `:` or space separators
//!   (`30-04-98-5A-08-0A`);
//! - nRF Connect log lines of the form
//!   `... "(0x) 30-04-98-5A-08-0A" received`.
//!
//! Blank lines and lines starting with `#` are ignored.
//!
//! Decoded captures can be written back out as plain hex dumps (one
//! notification per line) or as JSON lines of [`MessageRecord`]s for
//! spreadsheet or notebook analysis.

use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};
use tracing::{debug, info, warn};

use crate::{
    error::{EbikeError, Result},
    protocol::Message,
    types::{Field, FirmwareProfile},
};

const NRF_MARKER: &str = "(0x)";

fn mentions_received(text: &str) -> bool {
    text.to_ascii_lowercase().contains("received")
}

/// Decode a hex dump, ignoring separators
///
/// # Errors
///
/// Returns [`EbikeError::InvalidHex`] for non-hex characters or an odd digit
/// count.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .chars()
        .filter(|c| !matches!(c, '-' | ':' | ' ' | '\t'))
        .collect();
    Ok(hex::decode(digits)?)
}

/// Hex payload of an nRF Connect "received" line
#[must_use]
pub fn extract_nrf_payload(line: &str) -> Option<&str> {
    let start = line.find(NRF_MARKER)? + NRF_MARKER.len();
    let rest = line[start..].trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_hexdigit() || c == '-'))
        .unwrap_or(rest.len());

    let payload = &rest[..end];
    if payload.is_empty() || !mentions_received(&rest[end..]) {
        return None;
    }
    Some(payload)
}

/// Parse one capture line
///
/// Returns `Ok(None)` for blank lines, comments and nRF Connect lines that do
/// not carry a received payload.
///
/// # Errors
///
/// Returns [`EbikeError::InvalidHex`] if the payload is not valid hex, or
/// [`EbikeError::UnrecognizedLine`] for other nRF Connect log entries with a
/// hex marker but no data.
pub fn parse_log_line(line: &str) -> Result<Option<Vec<u8>>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    if line.contains(NRF_MARKER) {
        return match extract_nrf_payload(line) {
            Some(payload) => parse_hex(payload).map(Some),
            None if mentions_received(line) => {
                Err(EbikeError::UnrecognizedLine(line.to_string()))
            }
            None => Ok(None),
        };
    }

    parse_hex(line).map(Some)
}

/// Parse a whole capture, skipping bad lines
#[must_use]
pub fn parse_log(text: &str) -> Vec<Vec<u8>> {
    let mut buffers = Vec::new();
    for (number, line) in text.lines().enumerate() {
        match parse_log_line(line) {
            Ok(Some(buffer)) => buffers.push(buffer),
            Ok(None) => {}
            Err(e) => warn!("Skipping line {}: {e}", number + 1),
        }
    }
    debug!("Loaded {} buffer(s) from capture", buffers.len());
    buffers
}

/// Read a capture file
///
/// # Errors
///
/// Returns [`EbikeError::Io`] if the file cannot be read.
pub fn load_log(path: impl AsRef<Path>) -> Result<Vec<Vec<u8>>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_log(&text))
}

/// Format bytes the way capture files show them (`30-04-98-5A`)
#[must_use]
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join("-")
}

/// Write one notification per line as a plain hex dump
///
/// The output is accepted by [`parse_log`], so an nRF Connect log can be
/// reduced to its payloads once and replayed from there.
///
/// # Errors
///
/// Returns [`EbikeError::Io`] if writing fails.
pub fn write_hex_log<W: Write>(mut writer: W, buffers: &[Vec<u8>]) -> Result<()> {
    for buffer in buffers {
        writeln!(writer, "{}", format_hex(buffer))?;
    }
    writer.flush()?;
    Ok(())
}

/// Exported form of one decoded message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message ID
    pub id: u16,
    /// Field the profile maps the ID to, if any
    pub field: Option<Field>,
    /// Data type byte
    pub data_type: u8,
    /// Decoded value before scaling
    pub value: i32,
    /// Frame bytes as a dash-separated hex string
    pub raw: String,
}

impl MessageRecord {
    /// Build a record, naming the ID through `profile`
    #[must_use]
    pub fn new(message: &Message, profile: &FirmwareProfile) -> Self {
        Self {
            id: message.id,
            field: profile.field_for(message.id),
            data_type: message.data_type,
            value: message.value,
            raw: format_hex(&message.raw),
        }
    }
}

/// Write messages as JSON lines, one [`MessageRecord`] per line
///
/// Returns the number of records written.
///
/// # Errors
///
/// Returns [`EbikeError::Serialization`] or [`EbikeError::Io`] if a record
/// cannot be written.
pub fn write_records<W: Write>(
    mut writer: W,
    messages: &[Message],
    profile: &FirmwareProfile,
) -> Result<usize> {
    for message in messages {
        serde_json::to_writer(&mut writer, &MessageRecord::new(message, profile))?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(messages.len())
}

/// Export messages to a JSON lines file
///
/// # Errors
///
/// See [`write_records`]; also fails if the file cannot be created.
pub fn export_records(
    path: impl AsRef<Path>,
    messages: &[Message],
    profile: &FirmwareProfile,
) -> Result<usize> {
    let path = path.as_ref();
    let written = write_records(BufWriter::new(File::create(path)?), messages, profile)?;
    info!("Exported {written} message(s) to {}", path.display());
    Ok(written)
}
