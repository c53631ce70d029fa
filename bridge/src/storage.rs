use crate::errors::{Error, Result};
use crate::model::TelemetryRecord;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub const LOG_FILE_NAME: &str = "telemetry.csv";
pub const HEADER: [&str; 4] = ["ts", "device_id", "temp_c", "humidity"];

/// Append-only CSV log. Each append opens, writes one full row with a
/// single write call, flushes and closes the file.
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log at `<data_dir>/telemetry.csv`, creating the directory if needed.
    pub fn in_dir(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        Ok(Self::new(data_dir.join(LOG_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the header row if the file does not exist yet. An existing
    /// file is left untouched, so restarts never duplicate the header.
    pub fn ensure_header(&self) -> Result<()> {
        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                file.write_all(format_row(&HEADER).as_bytes())
                    .and_then(|_| file.sync_data())
                    .map_err(Error::PersistenceFailed)?;
                info!("Created log {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::PersistenceFailed(e)),
        }
    }

    pub fn append(&self, record: &TelemetryRecord) -> Result<()> {
        self.ensure_header()?;

        let row = record_row(record);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(Error::PersistenceFailed)?;

        file.write_all(row.as_bytes())
            .and_then(|_| file.flush())
            .map_err(Error::PersistenceFailed)
    }
}

fn record_row(record: &TelemetryRecord) -> String {
    let ts = record.timestamp_text();
    let temp_c = record.temp_c.as_ref().map(ToString::to_string).unwrap_or_default();
    let humidity = record.humidity.as_ref().map(ToString::to_string).unwrap_or_default();
    let device_id = record.device_id.as_deref().unwrap_or_default();

    format_row(&[ts.as_str(), device_id, temp_c.as_str(), humidity.as_str()])
}

/// Joins fields into one newline-terminated row, quoting per RFC 4180.
fn format_row(fields: &[&str]) -> String {
    let mut row = fields
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(",");
    row.push('\n');
    row
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_at;
    use chrono::{TimeZone, Utc};

    fn record(line: &str) -> TelemetryRecord {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        decode_at(line.as_bytes(), at).unwrap()
    }

    #[test]
    fn test_first_append_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvLog::in_dir(dir.path()).unwrap();

        log.append(&record(r#"{"device_id":"s1","temp_c":21.5,"humidity":40}"#))
            .unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            contents,
            "ts,device_id,temp_c,humidity\n2025-01-02T03:04:05Z,s1,21.5,40\n"
        );
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvLog::in_dir(dir.path()).unwrap();

        log.append(&record(r#"{"temp_c":null}"#)).unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().nth(1), Some("2025-01-02T03:04:05Z,,,"));
    }

    #[test]
    fn test_header_written_once_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        for _ in 0..3 {
            let log = CsvLog::in_dir(dir.path()).unwrap();
            log.ensure_header().unwrap();
            log.append(&record(r#"{"device_id":"s1","temp_c":1,"humidity":2}"#))
                .unwrap();
        }

        let contents = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.iter().filter(|l| l.starts_with("ts,")).count(), 1);
    }

    #[test]
    fn test_fields_are_quoted() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");

        let row = record_row(&record(r#"{"device_id":"lab, room 2"}"#));
        assert_eq!(row, "2025-01-02T03:04:05Z,\"lab, room 2\",,\n");
    }

    #[test]
    fn test_unwritable_target_is_persistence_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvLog::new(dir.path().join("missing").join(LOG_FILE_NAME));

        let result = log.append(&record(r#"{"device_id":"s1"}"#));
        assert!(matches!(result, Err(Error::PersistenceFailed(_))));
    }
}
