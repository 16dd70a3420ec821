// Error types and error handling

use std::io;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    SourceUnavailable(String),
    CompressionError(String),
    PayloadTooLarge { field: &'static str, length: u64 },
    EmptyFileName,
    InvalidFileName(String),
    FileNameTooLong(usize),
    ConnectError { host: String, reason: String },
    ConnectionLost(io::Error),
    TransferInProgress,
    SessionAlreadyRan,
    Worker(String),
    Protocol(String),
    ConfigError(String),
}

impl Error {
    /// True for the failures that happen before any byte reaches the wire.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable(_)
                | Error::CompressionError(_)
                | Error::PayloadTooLarge { .. }
                | Error::EmptyFileName
                | Error::InvalidFileName(_)
                | Error::FileNameTooLong(_)
                | Error::ConfigError(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::SourceUnavailable(e) => write!(f, "Source unavailable: {}", e),
            Error::CompressionError(e) => write!(f, "Compression error: {}", e),
            Error::PayloadTooLarge { field, length } => {
                write!(f, "Payload too large: {} of {} bytes does not fit in 32 bits", field, length)
            }
            Error::EmptyFileName => write!(f, "File name is empty"),
            Error::InvalidFileName(e) => write!(f, "Invalid file name: {}", e),
            Error::FileNameTooLong(len) => {
                write!(f, "File name too long: {} bytes (max {})", len, u16::MAX as usize - 1)
            }
            Error::ConnectError { host, reason } => {
                write!(f, "Cannot connect to {}: {}", host, reason)
            }
            Error::ConnectionLost(e) => write!(f, "Connection lost: {}", e),
            Error::TransferInProgress => write!(f, "Another transfer is already running"),
            Error::SessionAlreadyRan => write!(f, "Session already ran; start a new one to retry"),
            Error::Worker(e) => write!(f, "Transfer worker failed: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::ConfigError(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::ConnectionLost(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
