use crate::errors::{Error, Result};
use serialport::SerialPort;
use std::io::{BufRead, BufReader, ErrorKind};
use std::time::Duration;
use tracing::info;

/// Result of one bounded read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, terminator included.
    Line(Vec<u8>),
    /// Nothing complete arrived within the read timeout.
    Idle,
}

/// A blocking source of newline-terminated lines.
///
/// `next_line` must return within roughly one read timeout. The source is
/// closed when dropped.
pub trait LineSource: Send + 'static {
    fn next_line(&mut self) -> Result<ReadOutcome>;

    /// Human-readable name of the underlying device, for logs.
    fn name(&self) -> &str;
}

/// Opens a line source for a device name.
pub trait SourceOpener: Send + Sync + 'static {
    type Source: LineSource;

    fn open(&self, port: &str) -> Result<Self::Source>;

    /// Candidate device names for auto-selection.
    fn available_ports(&self) -> Result<Vec<String>> {
        crate::port::enumerate_ports()
    }
}

pub struct SerialLineSource {
    name: String,
    reader: BufReader<Box<dyn SerialPort>>,
    /// Bytes of a line still being received when the last read timed out.
    pending: Vec<u8>,
}

impl SerialLineSource {
    pub fn open(port: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        let serial = serialport::new(port, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|source| Error::DeviceOpenFailed {
                port: port.to_string(),
                source,
            })?;

        info!("Opened serial {} @ {}", port, baud_rate);

        Ok(Self {
            name: port.to_string(),
            reader: BufReader::new(serial),
            pending: Vec::new(),
        })
    }
}

impl LineSource for SerialLineSource {
    fn next_line(&mut self) -> Result<ReadOutcome> {
        read_line(&mut self.reader, &mut self.pending)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialLineSource {
    fn drop(&mut self) {
        info!("Closed serial {}", self.name);
    }
}

/// Reads up to the next newline, keeping partial data across timeouts.
fn read_line<R: BufRead>(reader: &mut R, pending: &mut Vec<u8>) -> Result<ReadOutcome> {
    match reader.read_until(b'\n', pending) {
        Ok(_) if pending.ends_with(b"\n") => Ok(ReadOutcome::Line(std::mem::take(pending))),
        // EOF or a short read without terminator; wait for the rest.
        Ok(_) => Ok(ReadOutcome::Idle),
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
            Ok(ReadOutcome::Idle)
        }
        Err(e) => Err(Error::SerialRead(e)),
    }
}

#[derive(Debug, Clone)]
pub struct SerialOpener {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl SourceOpener for SerialOpener {
    type Source = SerialLineSource;

    fn open(&self, port: &str) -> Result<SerialLineSource> {
        SerialLineSource::open(port, self.baud_rate, self.read_timeout)
    }
}
