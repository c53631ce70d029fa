use crate::errors::{Error, Result};
use crate::ingest::{IngestConfig, PersistPolicy};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Serial-to-WebSocket telemetry bridge
#[derive(Parser, Debug, Clone)]
#[command(name = "bridge")]
#[command(version)]
pub struct Config {
    /// Serial device to open; auto-selected when unset
    #[arg(long, env = "SERIAL_PORT")]
    pub serial_port: Option<String>,

    /// Serial baud rate
    #[arg(long, env = "BAUD", default_value_t = 115200)]
    pub baud: u32,

    /// Directory holding telemetry.csv
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// HTTP listen address
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8000")]
    pub http_addr: String,

    /// Serial read timeout in milliseconds
    #[arg(long, env = "READ_TIMEOUT_MS", default_value_t = 1000)]
    pub read_timeout_ms: u64,

    /// Pause after an empty read in milliseconds
    #[arg(long, env = "IDLE_DELAY_MS", default_value_t = 10)]
    pub idle_delay_ms: u64,

    /// Wait before retrying port selection in milliseconds
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 2000)]
    pub retry_delay_ms: u64,

    /// What to do when the CSV log cannot be written
    #[arg(long, env = "ON_PERSIST_ERROR", value_enum, default_value_t = PersistPolicy::Continue)]
    pub on_persist_error: PersistPolicy,

    /// Outbound queue depth per WebSocket subscriber
    #[arg(long, env = "SUBSCRIBER_BUFFER", default_value_t = 64)]
    pub subscriber_buffer: usize,

    /// HTML page served at `/` instead of the built-in dashboard
    #[arg(long, env = "INDEX_PAGE")]
    pub index_page: Option<PathBuf>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.baud == 0 {
            return Err(Error::Config("baud must be positive".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(Error::Config("read timeout must be positive".to_string()));
        }
        if self.retry_delay_ms == 0 {
            return Err(Error::Config("retry delay must be positive".to_string()));
        }
        if self.subscriber_buffer == 0 {
            return Err(Error::Config("subscriber buffer must be positive".to_string()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn ingest(&self) -> IngestConfig {
        IngestConfig {
            port: self.serial_port.clone().filter(|p| !p.is_empty()),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            idle_delay: Duration::from_millis(self.idle_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("bridge").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.baud, 115200);
        assert_eq!(config.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.on_persist_error, PersistPolicy::Continue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--serial-port",
            "/dev/ttyUSB1",
            "--baud",
            "9600",
            "--on-persist-error",
            "halt",
        ]);
        assert_eq!(config.ingest().port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.baud, 9600);
        assert_eq!(config.on_persist_error, PersistPolicy::Halt);
    }

    #[test]
    fn test_empty_port_means_auto_select() {
        let config = parse(&["--serial-port", ""]);
        assert_eq!(config.ingest().port, None);
    }

    #[test]
    fn test_zero_baud_rejected() {
        let config = parse(&["--baud", "0"]);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
