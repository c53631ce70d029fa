use crate::decode::DecodeFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No serial device available")]
    NoDeviceAvailable,

    #[error("Failed to open serial device {port}: {source}")]
    DeviceOpenFailed {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial enumeration error: {0}")]
    Enumerate(#[source] serialport::Error),

    #[error("Serial read error: {0}")]
    SerialRead(#[source] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeFailure),

    #[error("Persistence error: {0}")]
    PersistenceFailed(#[source] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the ingestion loop should wait and go back to port selection.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::NoDeviceAvailable => true,
            Error::DeviceOpenFailed { .. } => true,
            Error::Enumerate(_) => true,
            Error::SerialRead(_) => true,

            Error::Decode(_) => false,
            Error::PersistenceFailed(_) => false,
            Error::Config(_) => false,
            Error::Json(_) => false,
            Error::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::NoDeviceAvailable.is_recoverable());
        assert!(Error::SerialRead(std::io::Error::other("unplugged")).is_recoverable());
        assert!(!Error::PersistenceFailed(std::io::Error::other("disk full")).is_recoverable());
        assert!(!Error::Config("baud".to_string()).is_recoverable());
    }
}
