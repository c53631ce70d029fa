use crate::model::{DeviceReading, TelemetryRecord};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Maximum number of raw bytes kept in a failure preview.
pub const PREVIEW_LEN: usize = 80;

#[derive(Debug, Error)]
pub enum DecodeCause {
    #[error("empty line")]
    Empty,

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// A line that could not be turned into a record. Never fatal to ingestion.
#[derive(Debug)]
pub struct DecodeFailure {
    pub preview: Vec<u8>,
    pub cause: DecodeCause,
}

impl DecodeFailure {
    fn new(line: &[u8], cause: DecodeCause) -> Self {
        let len = line.len().min(PREVIEW_LEN);
        Self {
            preview: line[..len].to_vec(),
            cause,
        }
    }
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "skipped {:?}: {}",
            String::from_utf8_lossy(&self.preview),
            self.cause
        )
    }
}

impl std::error::Error for DecodeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Parses a raw line, stamping the current UTC time.
pub fn decode(line: &[u8]) -> Result<TelemetryRecord, DecodeFailure> {
    decode_at(line, Utc::now())
}

/// Parses a raw line, stamping `received_at`. Invalid UTF-8 sequences are
/// dropped rather than rejected; surrounding whitespace is stripped.
pub fn decode_at(
    line: &[u8],
    received_at: DateTime<Utc>,
) -> Result<TelemetryRecord, DecodeFailure> {
    let text = valid_text(line);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Err(DecodeFailure::new(line, DecodeCause::Empty));
    }

    // Parse as a map first so arrays never reach the struct's sequence form.
    let object = serde_json::from_str::<Map<String, Value>>(trimmed)
        .map_err(|e| DecodeFailure::new(line, DecodeCause::InvalidJson(e)))?;
    let reading = DeviceReading::deserialize(Value::Object(object))
        .map_err(|e| DecodeFailure::new(line, DecodeCause::InvalidJson(e)))?;

    Ok(TelemetryRecord::stamped(reading, received_at))
}

/// Keeps the valid UTF-8 runs of `bytes` and drops everything else.
fn valid_text(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}
