//! Reader for MetaEditor log files.
//!
//! MetaEditor writes its `/log` output as UTF-16LE, usually with a BOM and a
//! few blank lines before the first diagnostic. The text is passed through
//! verbatim apart from that leading noise.

use std::fs;
use std::path::Path;
use std::string::FromUtf16Error;
use thiserror::Error;
use tracing::warn;

/// Marker put in front of every log line when it is echoed.
pub const LINE_PREFIX: &str = "|  ";

const BOM: char = '\u{feff}';

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

#[derive(Debug, Error)]
pub enum LogDecodeError {
    #[error("truncated UTF-16 data ({0} bytes)")]
    OddLength(usize),
    #[error(transparent)]
    Utf16(#[from] FromUtf16Error),
}

/// Reads and formats a log file. Read or decode problems are logged and
/// produce an empty string.
pub fn read_log(path: &Path) -> String {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to read log file {}: {}", path.display(), e);
            return String::new();
        }
    };

    match decode_log(&bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to decode log file {}: {}", path.display(), e);
            String::new()
        }
    }
}

pub fn decode_log(bytes: &[u8]) -> Result<String, LogDecodeError> {
    let raw = decode_utf16le(bytes)?;
    let raw = raw.strip_prefix(BOM).unwrap_or(&raw);
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut text = String::new();
    for line in normalized
        .lines()
        .skip_while(|line| line.trim().is_empty())
    {
        text.push_str(LINE_PREFIX);
        text.push_str(line);
        text.push_str(LINE_ENDING);
    }

    Ok(text)
}

pub(crate) fn decode_utf16le(bytes: &[u8]) -> Result<String, LogDecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(LogDecodeError::OddLength(bytes.len()));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(String::from_utf16(&units)?)
}
